//! Configurable hooks.
//!
//! Every hook comes in a synchronous form (`from_fn`) and a suspend-capable
//! form (`from_async`). Both are stored behind the same enum so the engine
//! evaluates them through a single async call path; synchronous hooks run
//! inline and never yield.

use chronicle_core::EntitySnapshot;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::event::AuditEvent;
use crate::schema::AuditRecord;

type PredicateFn = dyn Fn(&EntitySnapshot) -> anyhow::Result<bool> + Send + Sync;
type AsyncPredicateFn =
    dyn for<'a> Fn(&'a EntitySnapshot) -> BoxFuture<'a, anyhow::Result<bool>> + Send + Sync;

type SelectorFn = dyn Fn(&EntitySnapshot) -> anyhow::Result<Option<String>> + Send + Sync;
type AsyncSelectorFn = dyn for<'a> Fn(&'a EntitySnapshot) -> BoxFuture<'a, anyhow::Result<Option<String>>>
    + Send
    + Sync;

type ActionFn =
    dyn Fn(&AuditEvent, &EntitySnapshot, &mut AuditRecord) -> anyhow::Result<bool> + Send + Sync;
type AsyncActionFn = dyn for<'a> Fn(
        &'a AuditEvent,
        &'a EntitySnapshot,
        &'a mut AuditRecord,
    ) -> BoxFuture<'a, anyhow::Result<bool>>
    + Send
    + Sync;

type OverrideValueFn = dyn Fn(&EntitySnapshot) -> anyhow::Result<Value> + Send + Sync;
type AsyncOverrideValueFn =
    dyn for<'a> Fn(&'a EntitySnapshot) -> BoxFuture<'a, anyhow::Result<Value>> + Send + Sync;

type FormatValueFn = dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync;
type AsyncFormatValueFn =
    dyn for<'a> Fn(&'a Value) -> BoxFuture<'a, anyhow::Result<Value>> + Send + Sync;

// =========================================================================
// PREDICATES
// =========================================================================

/// Decides whether an explicit mapping rule applies to a snapshot.
#[derive(Clone)]
pub enum EntityPredicate {
    Sync(Arc<PredicateFn>),
    Async(Arc<AsyncPredicateFn>),
}

impl EntityPredicate {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&EntitySnapshot) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Infallible predicate.
    pub fn matching<F>(f: F) -> Self
    where
        F: Fn(&EntitySnapshot) -> bool + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(
            move |snapshot: &EntitySnapshot| -> anyhow::Result<bool> { Ok(f(snapshot)) },
        ))
    }

    pub fn from_async<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a EntitySnapshot) -> BoxFuture<'a, anyhow::Result<bool>>
            + Send
            + Sync
            + 'static,
    {
        Self::Async(Arc::new(f))
    }

    pub async fn evaluate(&self, snapshot: &EntitySnapshot) -> anyhow::Result<bool> {
        match self {
            Self::Sync(f) => f(snapshot),
            Self::Async(f) => f(snapshot).await,
        }
    }
}

impl fmt::Debug for EntityPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "EntityPredicate::Sync"),
            Self::Async(_) => write!(f, "EntityPredicate::Async"),
        }
    }
}

// =========================================================================
// TARGET SELECTORS
// =========================================================================

/// Picks the audit type a snapshot maps to. `None` excludes the entity.
#[derive(Clone)]
pub enum TargetSelector {
    Fixed(String),
    Sync(Arc<SelectorFn>),
    Async(Arc<AsyncSelectorFn>),
}

impl TargetSelector {
    pub fn fixed(audit_type: impl Into<String>) -> Self {
        Self::Fixed(audit_type.into())
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&EntitySnapshot) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn from_async<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a EntitySnapshot) -> BoxFuture<'a, anyhow::Result<Option<String>>>
            + Send
            + Sync
            + 'static,
    {
        Self::Async(Arc::new(f))
    }

    /// The audit type name when the selector is fixed.
    pub fn fixed_name(&self) -> Option<&str> {
        match self {
            Self::Fixed(name) => Some(name),
            _ => None,
        }
    }

    pub async fn select(&self, snapshot: &EntitySnapshot) -> anyhow::Result<Option<String>> {
        match self {
            Self::Fixed(name) => Ok(Some(name.clone())),
            Self::Sync(f) => f(snapshot),
            Self::Async(f) => f(snapshot).await,
        }
    }
}

impl fmt::Debug for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(name) => write!(f, "TargetSelector::Fixed({})", name),
            Self::Sync(_) => write!(f, "TargetSelector::Sync"),
            Self::Async(_) => write!(f, "TargetSelector::Async"),
        }
    }
}

// =========================================================================
// INCLUSION ACTIONS
// =========================================================================

/// Inclusion action: runs against the filled audit record and returns
/// whether the entity stays in the trail. It may amend the record.
#[derive(Clone)]
pub enum EntityAction {
    Sync(Arc<ActionFn>),
    Async(Arc<AsyncActionFn>),
}

impl EntityAction {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&AuditEvent, &EntitySnapshot, &mut AuditRecord) -> anyhow::Result<bool>
            + Send
            + Sync
            + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Action that only amends the record and always includes the entity.
    pub fn inspect<F>(f: F) -> Self
    where
        F: Fn(&AuditEvent, &EntitySnapshot, &mut AuditRecord) + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(
            move |event: &AuditEvent,
                  snapshot: &EntitySnapshot,
                  record: &mut AuditRecord|
                  -> anyhow::Result<bool> {
                f(event, snapshot, record);
                Ok(true)
            },
        ))
    }

    pub fn from_async<F>(f: F) -> Self
    where
        F: for<'a> Fn(
                &'a AuditEvent,
                &'a EntitySnapshot,
                &'a mut AuditRecord,
            ) -> BoxFuture<'a, anyhow::Result<bool>>
            + Send
            + Sync
            + 'static,
    {
        Self::Async(Arc::new(f))
    }

    pub async fn invoke(
        &self,
        event: &AuditEvent,
        snapshot: &EntitySnapshot,
        record: &mut AuditRecord,
    ) -> anyhow::Result<bool> {
        match self {
            Self::Sync(f) => f(event, snapshot, record),
            Self::Async(f) => f(event, snapshot, record).await,
        }
    }
}

impl fmt::Debug for EntityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "EntityAction::Sync"),
            Self::Async(_) => write!(f, "EntityAction::Async"),
        }
    }
}

// =========================================================================
// PROPERTY TRANSFORMS
// =========================================================================

/// Computes a property value from the whole snapshot.
#[derive(Clone)]
pub enum OverrideFn {
    Sync(Arc<OverrideValueFn>),
    Async(Arc<AsyncOverrideValueFn>),
}

impl OverrideFn {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&EntitySnapshot) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Always produce the same value.
    pub fn value(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::Sync(Arc::new(
            move |_: &EntitySnapshot| -> anyhow::Result<Value> { Ok(value.clone()) },
        ))
    }

    pub fn from_async<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a EntitySnapshot) -> BoxFuture<'a, anyhow::Result<Value>>
            + Send
            + Sync
            + 'static,
    {
        Self::Async(Arc::new(f))
    }

    pub async fn compute(&self, snapshot: &EntitySnapshot) -> anyhow::Result<Value> {
        match self {
            Self::Sync(f) => f(snapshot),
            Self::Async(f) => f(snapshot).await,
        }
    }
}

impl fmt::Debug for OverrideFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "OverrideFn::Sync"),
            Self::Async(_) => write!(f, "OverrideFn::Async"),
        }
    }
}

/// Reformats a value copied from the source entity.
#[derive(Clone)]
pub enum FormatFn {
    Sync(Arc<FormatValueFn>),
    Async(Arc<AsyncFormatValueFn>),
}

impl FormatFn {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn from_async<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a Value) -> BoxFuture<'a, anyhow::Result<Value>> + Send + Sync + 'static,
    {
        Self::Async(Arc::new(f))
    }

    pub async fn format(&self, value: &Value) -> anyhow::Result<Value> {
        match self {
            Self::Sync(f) => f(value),
            Self::Async(f) => f(value).await,
        }
    }
}

impl fmt::Debug for FormatFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "FormatFn::Sync"),
            Self::Async(_) => write!(f, "FormatFn::Async"),
        }
    }
}
