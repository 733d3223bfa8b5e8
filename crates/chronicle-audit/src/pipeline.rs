//! Per-property transforms applied while an audit record is filled.
//!
//! Precedence for every property name, checked in this order:
//! 1. ignored: skipped entirely, nothing is copied, overridden or formatted
//! 2. override: value computed from the whole snapshot
//! 3. format: value copied from the source property, then reformatted
//! 4. plain copy from the source property of the same name
//!
//! The pipeline never changes whether an entity is audited, only the values
//! inside an already-mapped record.

use chronicle_core::{EntitySnapshot, PropertyMap};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{AuditError, HookStage, MappingError};
use crate::hooks::{FormatFn, OverrideFn};
use crate::schema::{AuditRecord, AuditSchema};

/// Validated transform rules for one entity type within one context.
#[derive(Debug, Clone, Default)]
pub struct EntitySettings {
    ignored: HashSet<String>,
    overrides: HashMap<String, OverrideFn>,
    formats: HashMap<String, FormatFn>,
}

impl EntitySettings {
    pub fn is_ignored(&self, property: &str) -> bool {
        self.ignored.contains(property)
    }

    pub fn override_for(&self, property: &str) -> Option<&OverrideFn> {
        self.overrides.get(property)
    }

    pub fn format_for(&self, property: &str) -> Option<&FormatFn> {
        self.formats.get(property)
    }
}

/// Accumulates transform rules; validated against the audit types the entity
/// type can map to when the mapping configuration is built.
#[derive(Debug, Clone, Default)]
pub struct EntitySettingsBuilder {
    ignored: Vec<String>,
    overrides: Vec<(String, OverrideFn)>,
    formats: Vec<(String, FormatFn)>,
}

impl EntitySettingsBuilder {
    /// Never write this property.
    pub fn ignore(mut self, property: impl Into<String>) -> Self {
        self.ignored.push(property.into());
        self
    }

    /// Replace this property with a fixed value.
    pub fn override_value(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.override_fn(property, OverrideFn::value(value))
    }

    /// Compute this property from the snapshot.
    pub fn override_with<F>(self, property: impl Into<String>, f: F) -> Self
    where
        F: Fn(&EntitySnapshot) -> Value + Send + Sync + 'static,
    {
        self.override_fn(
            property,
            OverrideFn::from_fn(move |snapshot: &EntitySnapshot| -> anyhow::Result<Value> {
                Ok(f(snapshot))
            }),
        )
    }

    pub fn override_fn(mut self, property: impl Into<String>, f: OverrideFn) -> Self {
        self.overrides.push((property.into(), f));
        self
    }

    /// Reformat the copied value of this property.
    pub fn format<F>(self, property: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.format_fn(
            property,
            FormatFn::from_fn(move |value: &Value| -> anyhow::Result<Value> { Ok(f(value)) }),
        )
    }

    pub fn format_fn(mut self, property: impl Into<String>, f: FormatFn) -> Self {
        self.formats.push((property.into(), f));
        self
    }

    /// Every property key must be declared by at least one of `targets`.
    /// A selector may send the entity to any of them, and a key the chosen
    /// target does not declare only shapes the column values.
    pub(crate) fn build(
        self,
        entity_type: &str,
        targets: &[&AuditSchema],
    ) -> Result<EntitySettings, MappingError> {
        let names = self
            .ignored
            .iter()
            .chain(self.overrides.iter().map(|(name, _)| name))
            .chain(self.formats.iter().map(|(name, _)| name));
        for name in names {
            if name.is_empty() {
                return Err(MappingError::EmptyPropertyName(entity_type.to_string()));
            }
            if !targets.iter().any(|schema| schema.has_property(name)) {
                return Err(MappingError::UnknownProperty {
                    entity_type: entity_type.to_string(),
                    property: name.clone(),
                });
            }
        }

        Ok(EntitySettings {
            ignored: self.ignored.into_iter().collect(),
            overrides: self.overrides.into_iter().collect(),
            formats: self.formats.into_iter().collect(),
        })
    }
}

/// Fills an audit record from a snapshot under a set of entity settings.
pub struct PropertyTransformPipeline<'a> {
    settings: Option<&'a EntitySettings>,
}

impl<'a> PropertyTransformPipeline<'a> {
    pub fn new(settings: Option<&'a EntitySettings>) -> Self {
        Self { settings }
    }

    /// Fill `record` from `snapshot` and return the shaped column values.
    ///
    /// Every property declared by the record's audit type and every current
    /// column of the snapshot is visited once, in name order. A resulting
    /// value is written to the record when the audit type declares the
    /// property, and to the column values when the snapshot has the column.
    /// Each override or format hook runs at most once per property.
    pub async fn apply(
        &self,
        snapshot: &EntitySnapshot,
        record: &mut AuditRecord,
    ) -> Result<PropertyMap, AuditError> {
        let declared: Vec<String> = record
            .schema()
            .map(|s| s.properties().to_vec())
            .unwrap_or_default();

        let names: BTreeSet<&str> = declared
            .iter()
            .map(String::as_str)
            .chain(snapshot.current.keys().map(String::as_str))
            .collect();

        let mut columns = PropertyMap::new();
        for name in names {
            let Some(value) = self.property_value(snapshot, name).await? else {
                continue;
            };
            if declared.iter().any(|p| p == name) {
                record.put(name, value.clone());
            }
            if snapshot.has_property(name) {
                columns.insert(name.to_string(), value);
            }
        }
        Ok(columns)
    }

    /// Synchronous form of [`apply`](Self::apply).
    pub fn apply_blocking(
        &self,
        snapshot: &EntitySnapshot,
        record: &mut AuditRecord,
    ) -> Result<PropertyMap, AuditError> {
        futures::executor::block_on(self.apply(snapshot, record))
    }

    async fn property_value(
        &self,
        snapshot: &EntitySnapshot,
        name: &str,
    ) -> Result<Option<Value>, AuditError> {
        let entity_type = snapshot.entity_type.as_str();

        if let Some(settings) = self.settings {
            if settings.is_ignored(name) {
                return Ok(None);
            }
            if let Some(ovr) = settings.override_for(name) {
                let value = ovr
                    .compute(snapshot)
                    .await
                    .map_err(|e| AuditError::hook(HookStage::Override, entity_type, e))?;
                return Ok(Some(value));
            }
        }

        let Some(source) = snapshot.current_value(name) else {
            return Ok(None);
        };

        match self.settings.and_then(|s| s.format_for(name)) {
            Some(format) => format
                .format(source)
                .await
                .map(Some)
                .map_err(|e| AuditError::hook(HookStage::Format, entity_type, e)),
            None => Ok(Some(source.clone())),
        }
    }
}
