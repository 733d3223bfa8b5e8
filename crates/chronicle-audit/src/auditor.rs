//! Per-entity auditing: mapping resolution, property transforms and the
//! inclusion action chain, combined into zero or one audit change.

use chronicle_core::{ChangeSource, EntitySnapshot};
use std::sync::Arc;

use crate::chain::EntityActionChain;
use crate::error::AuditError;
use crate::event::{AuditEntityChange, AuditEvent};
use crate::mapping::MappingConfig;
use crate::pipeline::PropertyTransformPipeline;
use crate::schema::AuditRecord;

/// Turns changed entities into [`AuditEntityChange`] records.
///
/// Cheap to clone; all clones share the same frozen configuration.
#[derive(Debug, Clone)]
pub struct EntityAuditor {
    config: Arc<MappingConfig>,
}

impl EntityAuditor {
    pub fn new(config: Arc<MappingConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Audit one snapshot tracked by `context`.
    ///
    /// Returns `Ok(None)` when the entity is excluded. Exclusion by mapping
    /// runs no action at all; exclusion by the action chain leaves whatever
    /// the earlier actions already did in place.
    pub async fn audit_entity(
        &self,
        context: &str,
        event: &AuditEvent,
        snapshot: &EntitySnapshot,
    ) -> Result<Option<AuditEntityChange>, AuditError> {
        let Some(mapping) = self.config.resolver().resolve(snapshot).await? else {
            return Ok(None);
        };

        let mut record = AuditRecord::new(Arc::clone(&mapping.target));
        let settings = self.config.settings_for(context, &snapshot.entity_type);
        let column_values = PropertyTransformPipeline::new(settings)
            .apply(snapshot, &mut record)
            .await?;

        let included = EntityActionChain::new(mapping.action, self.config.global_action())
            .invoke(event, snapshot, &mut record)
            .await?;
        if !included {
            tracing::debug!(
                entity_type = %snapshot.entity_type,
                audit_type = %mapping.target.name(),
                "Entity excluded by inclusion action"
            );
            return Ok(None);
        }

        tracing::debug!(
            entity_type = %snapshot.entity_type,
            audit_type = %mapping.target.name(),
            kind = %snapshot.kind,
            rule = ?mapping.source,
            "Entity audited"
        );

        Ok(Some(AuditEntityChange {
            target_type: mapping.target.name().to_string(),
            entity_type: snapshot.entity_type.clone(),
            table: snapshot.table.clone(),
            kind: snapshot.kind,
            primary_key: snapshot.primary_key.clone(),
            record,
            column_values,
            changes: snapshot.column_changes(),
        }))
    }

    /// Synchronous form of [`audit_entity`](Self::audit_entity).
    pub fn audit_entity_blocking(
        &self,
        context: &str,
        event: &AuditEvent,
        snapshot: &EntitySnapshot,
    ) -> Result<Option<AuditEntityChange>, AuditError> {
        futures::executor::block_on(self.audit_entity(context, event, snapshot))
    }

    /// Audit every snapshot of a change source, in order. The first hook
    /// failure aborts the whole batch.
    pub async fn audit_changes(
        &self,
        event: &AuditEvent,
        source: &(dyn ChangeSource + Sync),
    ) -> Result<Vec<AuditEntityChange>, AuditError> {
        let context = source.context_name();
        let mut changes = Vec::new();
        for snapshot in source.snapshots() {
            if let Some(change) = self.audit_entity(context, event, &snapshot).await? {
                changes.push(change);
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{EntityAction, TargetSelector};
    use crate::schema::AuditSchema;
    use chronicle_core::{ChangeKind, ChangeSet};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn auditor(builder: crate::mapping::MappingConfigBuilder) -> EntityAuditor {
        EntityAuditor::new(Arc::new(builder.build().unwrap()))
    }

    fn order() -> EntitySnapshot {
        EntitySnapshot::new("Order", "orders", ChangeKind::Update)
            .with_key("Id", 9)
            .with_original("Status", "open")
            .with_value("Id", 9)
            .with_value("Status", "paid")
    }

    #[test]
    fn test_audited_entity_carries_record_and_changes() {
        let auditor = auditor(
            MappingConfig::builder()
                .schema(AuditSchema::new("OrderAudit", ["Id", "Status", "Action"]))
                .map_with_action(
                    "Order",
                    "OrderAudit",
                    EntityAction::from_fn(|_, snapshot, record| {
                        record.set("Action", snapshot.kind.to_string())?;
                        Ok(true)
                    }),
                ),
        );

        let event = AuditEvent::new("Shop:pay");
        let change = auditor
            .audit_entity_blocking("Shop", &event, &order())
            .unwrap()
            .unwrap();

        assert_eq!(change.target_type, "OrderAudit");
        assert_eq!(change.table, "orders");
        assert_eq!(change.primary_key.get("Id"), Some(&json!(9)));
        assert_eq!(change.record.get("Status"), Some(&json!("paid")));
        assert_eq!(change.record.get("Action"), Some(&json!("UPDATE")));
        assert_eq!(change.changes.len(), 1);
        assert_eq!(change.changes[0].column, "Status");
    }

    #[test]
    fn test_null_selector_skips_action_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (specific, global) = (Arc::clone(&calls), Arc::clone(&calls));

        let auditor = auditor(
            MappingConfig::builder()
                .schema(AuditSchema::new("OrderAudit", ["Id"]))
                .map_rule(
                    "Order",
                    crate::mapping::MappingRule::new(TargetSelector::from_fn(|_| Ok(None)))
                        .with_action(EntityAction::from_fn(move |_, _, _| {
                            specific.fetch_add(1, Ordering::SeqCst);
                            Ok(true)
                        })),
                )
                .global_action(EntityAction::from_fn(move |_, _, _| {
                    global.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                })),
        );

        let event = AuditEvent::new("Shop:pay");
        let change = auditor.audit_entity_blocking("Shop", &event, &order()).unwrap();
        assert!(change.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_settings_are_scoped_per_context() {
        let auditor = auditor(
            MappingConfig::builder()
                .schema(AuditSchema::new("OrderAudit", ["Id", "Status"]))
                .map("Order", "OrderAudit")
                .settings("Backoffice", "Order", |s| s.ignore("Status")),
        );
        let event = AuditEvent::new("x");

        let shop = auditor
            .audit_entity_blocking("Shop", &event, &order())
            .unwrap()
            .unwrap();
        assert!(shop.record.contains("Status"));

        let backoffice = auditor
            .audit_entity_blocking("Backoffice", &event, &order())
            .unwrap()
            .unwrap();
        assert!(!backoffice.record.contains("Status"));
    }

    #[test]
    fn test_fan_out_entity_uses_one_settings_entry_for_every_target() {
        let auditor = auditor(
            MappingConfig::builder()
                .schema(AuditSchema::new("OrderAudit", ["Id", "Status", "CardNumber"]))
                .schema(AuditSchema::new("ClosedOrderAudit", ["Id", "Status", "CardNumber"]))
                .map_selector(
                    "Order",
                    TargetSelector::from_fn(|s| {
                        Ok(match s.current_value("Status").and_then(|v| v.as_str()) {
                            Some("closed") => Some("ClosedOrderAudit".to_string()),
                            _ => Some("OrderAudit".to_string()),
                        })
                    }),
                )
                .settings("Shop", "Order", |s| s.ignore("CardNumber")),
        );
        let event = AuditEvent::new("Shop:pay");

        for (status, target) in [("open", "OrderAudit"), ("closed", "ClosedOrderAudit")] {
            let snapshot = order()
                .with_value("Status", status)
                .with_value("CardNumber", "4111");
            let change = auditor
                .audit_entity_blocking("Shop", &event, &snapshot)
                .unwrap()
                .unwrap();
            assert_eq!(change.target_type, target);
            assert!(!change.record.contains("CardNumber"));
            assert!(!change.column_values.contains_key("CardNumber"));
            assert_eq!(change.record.get("Status"), Some(&json!(status)));
        }
    }

    #[test]
    fn test_entity_types_sharing_an_audit_type_keep_their_own_settings() {
        let auditor = auditor(
            MappingConfig::builder()
                .schema(AuditSchema::new("PartyAudit", ["Id", "Name", "Email"]))
                .map("Customer", "PartyAudit")
                .map("Supplier", "PartyAudit")
                .settings("Shop", "Customer", |s| s.ignore("Email"))
                .settings("Shop", "Supplier", |s| s.override_value("Name", "supplier")),
        );
        let event = AuditEvent::new("Shop:sync");
        let party = |entity_type: &str| {
            EntitySnapshot::new(entity_type, "parties", ChangeKind::Insert)
                .with_value("Id", 1)
                .with_value("Name", "Ada")
                .with_value("Email", "ada@example.com")
        };

        let customer = auditor
            .audit_entity_blocking("Shop", &event, &party("Customer"))
            .unwrap()
            .unwrap();
        assert!(!customer.record.contains("Email"));
        assert_eq!(customer.record.get("Name"), Some(&json!("Ada")));

        let supplier = auditor
            .audit_entity_blocking("Shop", &event, &party("Supplier"))
            .unwrap()
            .unwrap();
        assert_eq!(supplier.record.get("Email"), Some(&json!("ada@example.com")));
        assert_eq!(supplier.record.get("Name"), Some(&json!("supplier")));
    }

    #[tokio::test]
    async fn test_audit_changes_keeps_source_order() {
        let auditor = auditor(
            MappingConfig::builder()
                .schema(AuditSchema::new("OrderAudit", ["Id"]))
                .schema(AuditSchema::new("LineAudit", ["Id"]))
                .map("Order", "OrderAudit")
                .map("Line", "LineAudit"),
        );

        let changes = ChangeSet::new("Shop")
            .push(EntitySnapshot::new("Line", "lines", ChangeKind::Insert).with_value("Id", 1))
            .push(EntitySnapshot::new("Customer", "customers", ChangeKind::Insert))
            .push(order());

        let event = AuditEvent::new("Shop:checkout");
        let audited = auditor.audit_changes(&event, &changes).await.unwrap();
        let targets: Vec<&str> = audited.iter().map(|c| c.target_type.as_str()).collect();
        assert_eq!(targets, vec!["LineAudit", "OrderAudit"]);
    }
}
