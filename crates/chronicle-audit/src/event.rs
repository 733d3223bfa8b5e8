//! Audit event types.
//!
//! An [`AuditEvent`] is the aggregate a scope writes to its sink: the event
//! label, start and end timestamps, one [`AuditEntityChange`] per included
//! entity, and whatever custom fields the caller attached.

use chrono::{DateTime, Utc};
use chronicle_core::{ChangeKind, ColumnChange, PropertyMap};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::schema::AuditRecord;

/// Opaque identifier a sink assigns to an inserted event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id, for sinks that do not generate their own.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for EventId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The audit output for one included entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntityChange {
    /// Audit type the entity was mapped to.
    pub target_type: String,

    /// Declared type of the source entity.
    pub entity_type: String,

    /// Table the source entity lives in.
    pub table: String,

    pub kind: ChangeKind,

    #[serde(default, skip_serializing_if = "PropertyMap::is_empty")]
    pub primary_key: PropertyMap,

    /// The materialized audit record.
    pub record: AuditRecord,

    /// Source column values after ignore/override/format rules.
    #[serde(default)]
    pub column_values: PropertyMap,

    /// Field-level changes (old/new).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<ColumnChange>,
}

/// An audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Caller-assigned label (e.g. "ShopContext:checkout").
    pub event_type: String,

    /// When the scope was opened.
    pub start_date: DateTime<Utc>,

    /// When the scope was closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,

    /// Duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Entities included in the trail.
    #[serde(default)]
    pub entity_changes: Vec<AuditEntityChange>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,

    /// Arbitrary caller-attached fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_fields: Map<String, Value>,

    /// Error message when the audited operation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create an event that starts now.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            start_date: Utc::now(),
            end_date: None,
            duration_ms: None,
            entity_changes: Vec::new(),
            comments: Vec::new(),
            custom_fields: Map::new(),
            error: None,
        }
    }

    pub fn set_custom_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.custom_fields.insert(name.into(), value.into());
    }

    pub fn custom_field(&self, name: &str) -> Option<&Value> {
        self.custom_fields.get(name)
    }

    pub fn add_comment(&mut self, comment: impl Into<String>) {
        self.comments.push(comment.into());
    }

    /// Stamp the end time and duration.
    pub fn finish(&mut self) {
        let now = Utc::now();
        let elapsed = (now - self.start_date).num_milliseconds().max(0);
        self.end_date = Some(now);
        self.duration_ms = Some(elapsed as u64);
    }

    /// Format the event as a human-readable log line.
    ///
    /// Format: `[timestamp] event_type entities=N [tables=[...]] [error="..."]`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} entities={}",
            self.start_date.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.event_type,
            self.entity_changes.len(),
        );

        if !self.entity_changes.is_empty() {
            let mut tables: Vec<&str> = self
                .entity_changes
                .iter()
                .map(|c| c.table.as_str())
                .collect();
            tables.sort_unstable();
            tables.dedup();
            line.push_str(&format!(" tables=[{}]", tables.join(",")));
        }

        if let Some(duration) = self.duration_ms {
            line.push_str(&format!(" duration_ms={}", duration));
        }

        if let Some(ref error) = self.error {
            line.push_str(&format!(" error=\"{}\"", error.replace('"', "'")));
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AuditSchema;
    use serde_json::json;
    use std::sync::Arc;

    fn sample_event() -> AuditEvent {
        let schema = Arc::new(AuditSchema::new("OrderAudit", ["Id", "Status"]));
        let mut record = AuditRecord::new(schema);
        record.set("Id", 1).unwrap();
        record.set("Status", "open").unwrap();

        let mut event = AuditEvent::new("ShopContext:checkout");
        event.entity_changes.push(AuditEntityChange {
            target_type: "OrderAudit".to_string(),
            entity_type: "Order".to_string(),
            table: "orders".to_string(),
            kind: ChangeKind::Insert,
            primary_key: PropertyMap::from([("Id".to_string(), json!(1))]),
            record,
            column_values: PropertyMap::from([("Id".to_string(), json!(1))]),
            changes: vec![ColumnChange::new("Id", Value::Null, json!(1))],
        });
        event.set_custom_field("user", "alice");
        event.add_comment("checkout from web");
        event.finish();
        event
    }

    #[test]
    fn test_finish_stamps_end() {
        let event = sample_event();
        assert!(event.end_date.is_some());
        assert!(event.end_date.unwrap() >= event.start_date);
        assert!(event.duration_ms.is_some());
    }

    #[test]
    fn test_to_log_line() {
        let mut event = sample_event();
        event.error = Some("payment \"declined\"".to_string());

        let line = event.to_log_line();
        assert!(line.contains("ShopContext:checkout"));
        assert!(line.contains("entities=1"));
        assert!(line.contains("tables=[orders]"));
        assert!(line.contains("error=\"payment 'declined'\""));
    }

    #[test]
    fn test_event_roundtrips_through_json() {
        let event = sample_event();
        let text = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.custom_field("user"), Some(&json!("alice")));
    }

    #[test]
    fn audit_event_serialization_validates_against_schema() {
        let instance = serde_json::to_value(sample_event()).expect("audit event must serialize");
        let schema: serde_json::Value =
            serde_json::from_str(include_str!("../../../schemas/AuditEvent.schema.json"))
                .expect("schema must parse");

        let validator = jsonschema::draft202012::options()
            .build(&schema)
            .expect("schema must compile");

        if !validator.is_valid(&instance) {
            let mut msgs = Vec::new();
            for (idx, err) in validator.iter_errors(&instance).take(20).enumerate() {
                msgs.push(format!("{}: {}", idx + 1, err));
            }
            panic!("audit event did not validate: {}", msgs.join("; "));
        }
    }
}
