//! Declarative entity mappings.
//!
//! The YAML form covers fixed targets, ignored properties and constant
//! overrides. Selectors, predicates, formats and actions need code and are
//! added through the mapping builder.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Mapping section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MappingDefinition {
    /// Audit types and the properties each one declares.
    #[serde(default)]
    pub audit_types: BTreeMap<String, Vec<String>>,

    /// Entity type -> audit type.
    #[serde(default)]
    pub entities: BTreeMap<String, String>,

    /// Property settings per (context, audit type).
    #[serde(default)]
    pub settings: Vec<SettingsDefinition>,
}

impl MappingDefinition {
    pub fn is_empty(&self) -> bool {
        self.audit_types.is_empty() && self.entities.is_empty() && self.settings.is_empty()
    }
}

/// Property settings for one entity type inside one context. They apply to
/// whichever audit type the entity is mapped to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsDefinition {
    pub context: String,
    pub entity_type: String,

    /// Properties never written.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Properties always written with a constant value.
    #[serde(default, rename = "override")]
    pub overrides: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_mapping_section() {
        let yaml = r#"
audit_types:
  OrderAudit: [Id, Status, CardNumber, AuditedBy]
entities:
  Order: OrderAudit
settings:
  - context: Shop
    entity_type: Order
    ignore: [CardNumber]
    override:
      AuditedBy: batch
"#;
        let def: MappingDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.audit_types["OrderAudit"].len(), 4);
        assert_eq!(def.entities["Order"], "OrderAudit");
        assert_eq!(def.settings[0].entity_type, "Order");
        assert_eq!(def.settings[0].ignore, vec!["CardNumber".to_string()]);
        assert_eq!(def.settings[0].overrides["AuditedBy"], json!("batch"));
        assert!(!def.is_empty());
        assert!(MappingDefinition::default().is_empty());
    }
}
