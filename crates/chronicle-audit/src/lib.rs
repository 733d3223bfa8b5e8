//! # chronicle-audit
//!
//! Audit trails for change-tracked units of work.
//!
//! This crate provides functionality for:
//! - Mapping changed entities to audit types (explicit predicate rules, then
//!   type-keyed rules)
//! - Shaping audit records per property (ignore, override, format)
//! - Deciding inclusion through a rule-specific and a global action
//! - Writing the audit event to a sink at the times a creation policy asks for
//!
//! ## Creation Policies
//!
//! | Policy | On open | On close |
//! |--------|---------|----------|
//! | `Manual` | - | - (call `save`) |
//! | `InsertOnEnd` | - | insert |
//! | `InsertOnStartReplaceOnEnd` | insert | replace |
//! | `InsertOnStartInsertOnEnd` | insert | insert |
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use chronicle_audit::{
//!     AuditSchema, AuditScope, AuditScopeOptions, CreationPolicy, EntityAuditor,
//!     InMemorySink, MappingConfig,
//! };
//! use chronicle_core::{ChangeKind, ChangeSet, EntitySnapshot};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MappingConfig::builder()
//!     .schema(AuditSchema::new("OrderAudit", ["Id", "Status", "CardNumber"]))
//!     .map("Order", "OrderAudit")
//!     .settings("Shop", "Order", |s| s.ignore("CardNumber"))
//!     .build()?;
//! let auditor = EntityAuditor::new(Arc::new(config));
//!
//! let sink = Arc::new(InMemorySink::new());
//! let options = AuditScopeOptions::new("Shop:checkout", sink)
//!     .policy(CreationPolicy::InsertOnStartReplaceOnEnd);
//! let mut scope = AuditScope::open(options).await?;
//!
//! let changes = ChangeSet::new("Shop").push(
//!     EntitySnapshot::new("Order", "orders", ChangeKind::Update)
//!         .with_value("Id", 7)
//!         .with_value("Status", "paid"),
//! );
//! scope.track(&auditor, &changes).await?;
//! scope.end().await?;
//! # Ok(())
//! # }
//! ```

pub mod auditor;
pub mod chain;
pub mod error;
pub mod event;
pub mod hooks;
pub mod lifecycle;
pub mod mapping;
pub mod pipeline;
pub mod schema;
pub mod scope;
pub mod storage;

pub use auditor::EntityAuditor;
pub use chain::EntityActionChain;
pub use chronicle_core::CreationPolicy;
pub use error::{AuditError, HookStage, MappingError};
pub use event::{AuditEntityChange, AuditEvent, EventId};
pub use hooks::{EntityAction, EntityPredicate, FormatFn, OverrideFn, TargetSelector};
pub use lifecycle::{AuditWriteLifecycle, LifecycleState};
pub use mapping::{
    EntityMappingResolver, ExplicitMappingRule, MappingConfig, MappingConfigBuilder, MappingRule,
    ResolvedMapping, RuleSource,
};
pub use pipeline::{EntitySettings, EntitySettingsBuilder, PropertyTransformPipeline};
pub use schema::{AuditRecord, AuditSchema};
pub use scope::{AuditScope, AuditScopeOptions, audit_operation};
pub use storage::{
    AuditSink, ConsoleSink, FileSink, InMemorySink, NullSink, SinkCall, create_sink,
};
