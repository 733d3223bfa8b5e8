//! Audit representation types.
//!
//! An audit type is identified by name and declares the properties its
//! records may carry. Property keys used anywhere in the mapping
//! configuration are validated against these declarations at build time.

use chronicle_core::PropertyMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::AuditError;

/// Declaration of an audit representation type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSchema {
    name: String,
    properties: Vec<String>,
}

impl AuditSchema {
    /// Declare an audit type with its property names, in declaration order.
    pub fn new<I, S>(name: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut declared: Vec<String> = Vec::new();
        for property in properties {
            let property = property.into();
            if !declared.contains(&property) {
                declared.push(property);
            }
        }
        Self {
            name: name.into(),
            properties: declared,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Property names are case-sensitive.
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p == name)
    }
}

/// One instance of an audit type, filled by the transform pipeline and
/// possibly amended by inclusion actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_type: String,
    #[serde(default)]
    pub values: PropertyMap,
    #[serde(skip)]
    schema: Option<Arc<AuditSchema>>,
}

impl PartialEq for AuditRecord {
    fn eq(&self, other: &Self) -> bool {
        self.audit_type == other.audit_type && self.values == other.values
    }
}

impl AuditRecord {
    /// Create an empty record of the given audit type.
    pub fn new(schema: Arc<AuditSchema>) -> Self {
        Self {
            audit_type: schema.name().to_string(),
            values: PropertyMap::new(),
            schema: Some(schema),
        }
    }

    /// The schema this record was created from. Records read back from a
    /// sink carry no schema.
    pub fn schema(&self) -> Option<&Arc<AuditSchema>> {
        self.schema.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Set a property value. Fails when the audit type does not declare it.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), AuditError> {
        if let Some(schema) = &self.schema {
            if !schema.has_property(name) {
                return Err(AuditError::UnknownProperty {
                    audit_type: self.audit_type.clone(),
                    property: name.to_string(),
                });
            }
        }
        self.values.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    // Only called with names taken from the schema itself.
    pub(crate) fn put(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }
}
