use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// Configuration types shared across all Chronicle crates
pub mod config;

pub use config::{
    AuditConfig, ChronicleConfig, ConfigError, CreationPolicy, MappingDefinition, SettingsDefinition,
    SinkBackend, SinkConfig,
};

/// Ordered property bag (column name -> value).
pub type PropertyMap = BTreeMap<String, Value>;

/// Kind of change a tracked entity went through inside a unit-of-work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Read-only view of one changed record.
///
/// Produced by the change-tracking context; the audit engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Declared entity type (e.g. "Order").
    pub entity_type: String,
    /// Table or collection the entity is persisted in.
    pub table: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub primary_key: PropertyMap,
    /// Current property values. For deletes this is the last known state.
    #[serde(default)]
    pub current: PropertyMap,
    /// Original property values, when the tracker has them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<PropertyMap>,
}

impl EntitySnapshot {
    pub fn new(entity_type: impl Into<String>, table: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            entity_type: entity_type.into(),
            table: table.into(),
            kind,
            primary_key: PropertyMap::new(),
            current: PropertyMap::new(),
            original: None,
        }
    }

    /// Set a current property value.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.current.insert(name.into(), value.into());
        self
    }

    /// Set an original property value.
    pub fn with_original(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.original
            .get_or_insert_with(PropertyMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Add a primary key column.
    pub fn with_key(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.primary_key.insert(name.into(), value.into());
        self
    }

    pub fn current_value(&self, name: &str) -> Option<&Value> {
        self.current.get(name)
    }

    pub fn original_value(&self, name: &str) -> Option<&Value> {
        self.original.as_ref().and_then(|o| o.get(name))
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.current.contains_key(name)
    }

    /// Field-level changes of this entity.
    ///
    /// Updates report only columns present in both the original and the
    /// current state whose values differ; a column missing on either side is
    /// unknown, not null. Inserts report every column with no old value,
    /// deletes every column with no new value.
    pub fn column_changes(&self) -> Vec<ColumnChange> {
        match self.kind {
            ChangeKind::Insert => self
                .current
                .iter()
                .map(|(name, value)| ColumnChange::new(name, Value::Null, value.clone()))
                .collect(),
            ChangeKind::Delete => self
                .original
                .as_ref()
                .unwrap_or(&self.current)
                .iter()
                .map(|(name, value)| ColumnChange::new(name, value.clone(), Value::Null))
                .collect(),
            ChangeKind::Update => {
                let Some(original) = &self.original else {
                    return Vec::new();
                };
                original
                    .iter()
                    .filter_map(|(name, old)| match self.current.get(name) {
                        Some(new) if new != old => {
                            Some(ColumnChange::new(name, old.clone(), new.clone()))
                        }
                        _ => None,
                    })
                    .collect()
            }
        }
    }
}

/// One column's old and new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnChange {
    pub column: String,
    pub old: Value,
    pub new: Value,
}

impl ColumnChange {
    pub fn new(column: impl Into<String>, old: Value, new: Value) -> Self {
        Self {
            column: column.into(),
            old,
            new,
        }
    }
}

/// The change-tracking context of a unit-of-work.
///
/// Supplies the entities that changed and the name of the context type
/// they were tracked by (entity settings are scoped per context).
pub trait ChangeSource {
    fn context_name(&self) -> &str;

    fn snapshots(&self) -> Vec<EntitySnapshot>;
}

/// Owned change-set, e.g. loaded from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub context: String,
    #[serde(default)]
    pub entries: Vec<EntitySnapshot>,
}

impl ChangeSet {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(mut self, snapshot: EntitySnapshot) -> Self {
        self.entries.push(snapshot);
        self
    }
}

impl ChangeSource for ChangeSet {
    fn context_name(&self) -> &str {
        &self.context
    }

    fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_changes_only_report_differences() {
        let snapshot = EntitySnapshot::new("Order", "orders", ChangeKind::Update)
            .with_original("status", "open")
            .with_original("total", 10)
            .with_value("status", "shipped")
            .with_value("total", 10);

        let changes = snapshot.column_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].column, "status");
        assert_eq!(changes[0].old, json!("open"));
        assert_eq!(changes[0].new, json!("shipped"));
    }

    #[test]
    fn test_update_with_partial_original_skips_unknown_columns() {
        let snapshot = EntitySnapshot::new("Order", "orders", ChangeKind::Update)
            .with_original("status", "open")
            .with_original("note", "gift")
            .with_value("id", 9)
            .with_value("status", "paid");

        let changes = snapshot.column_changes();
        assert_eq!(
            changes,
            vec![ColumnChange::new("status", json!("open"), json!("paid"))]
        );
    }

    #[test]
    fn test_update_without_original_has_no_changes() {
        let snapshot =
            EntitySnapshot::new("Order", "orders", ChangeKind::Update).with_value("status", "open");
        assert!(snapshot.column_changes().is_empty());
    }

    #[test]
    fn test_insert_and_delete_changes() {
        let inserted =
            EntitySnapshot::new("Order", "orders", ChangeKind::Insert).with_value("id", 1);
        let changes = inserted.column_changes();
        assert_eq!(changes[0].old, Value::Null);
        assert_eq!(changes[0].new, json!(1));

        let deleted = EntitySnapshot::new("Order", "orders", ChangeKind::Delete)
            .with_original("id", 1)
            .with_value("id", 1);
        let changes = deleted.column_changes();
        assert_eq!(changes[0].old, json!(1));
        assert_eq!(changes[0].new, Value::Null);
    }

    #[test]
    fn test_change_set_deserializes() {
        let set: ChangeSet = serde_json::from_value(json!({
            "context": "ShopContext",
            "entries": [{
                "entity_type": "Order",
                "table": "orders",
                "kind": "insert",
                "primary_key": { "id": 7 },
                "current": { "id": 7, "status": "open" }
            }]
        }))
        .unwrap();

        assert_eq!(set.context_name(), "ShopContext");
        let snapshots = set.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].kind, ChangeKind::Insert);
        assert_eq!(snapshots[0].current_value("status"), Some(&json!("open")));
        assert!(snapshots[0].original_value("status").is_none());
    }
}
