//! Entity-to-audit-type mapping.
//!
//! A [`MappingConfig`] is accumulated with [`MappingConfigBuilder`] and then
//! frozen. It holds:
//! - the registered audit types ([`AuditSchema`])
//! - an ordered list of explicit rules (predicate + rule), evaluated first
//! - a type-keyed table of rules (one per source entity type)
//! - an optional fallback name mapper for types without a rule
//! - one global inclusion action
//! - entity settings per (context, entity type)
//!
//! The frozen configuration is shared as `Arc<MappingConfig>` between any
//! number of scopes and is never mutated again.

use chronicle_core::{EntitySnapshot, MappingDefinition};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AuditError, HookStage, MappingError};
use crate::hooks::{EntityAction, EntityPredicate, TargetSelector};
use crate::pipeline::{EntitySettings, EntitySettingsBuilder};
use crate::schema::AuditSchema;

type NameMapperFn = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Maps a source entity to an audit type, with an optional inclusion action.
#[derive(Debug, Clone)]
pub struct MappingRule {
    target: TargetSelector,
    action: Option<EntityAction>,
}

impl MappingRule {
    pub fn new(target: TargetSelector) -> Self {
        Self {
            target,
            action: None,
        }
    }

    /// Rule with a fixed audit type.
    pub fn to(audit_type: impl Into<String>) -> Self {
        Self::new(TargetSelector::fixed(audit_type))
    }

    pub fn with_action(mut self, action: EntityAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn target(&self) -> &TargetSelector {
        &self.target
    }

    pub fn action(&self) -> Option<&EntityAction> {
        self.action.as_ref()
    }
}

/// A rule that applies whenever its predicate matches, regardless of the
/// entity's declared type.
#[derive(Debug, Clone)]
pub struct ExplicitMappingRule {
    predicate: EntityPredicate,
    rule: MappingRule,
}

impl ExplicitMappingRule {
    pub fn new(predicate: EntityPredicate, rule: MappingRule) -> Self {
        Self { predicate, rule }
    }
}

/// Which configuration entry produced a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSource {
    /// Explicit rule at this registration index.
    Explicit(usize),
    TypeKeyed,
    NameMapper,
}

/// Immutable mapping configuration.
pub struct MappingConfig {
    schemas: HashMap<String, Arc<AuditSchema>>,
    explicit: Vec<ExplicitMappingRule>,
    by_type: HashMap<String, MappingRule>,
    name_mapper: Option<Arc<NameMapperFn>>,
    global_action: Option<EntityAction>,
    settings: HashMap<(String, String), EntitySettings>,
}

impl MappingConfig {
    pub fn builder() -> MappingConfigBuilder {
        MappingConfigBuilder::default()
    }

    pub fn schema(&self, audit_type: &str) -> Option<&Arc<AuditSchema>> {
        self.schemas.get(audit_type)
    }

    pub fn global_action(&self) -> Option<&EntityAction> {
        self.global_action.as_ref()
    }

    /// Settings for an entity type within a context, if any were configured.
    /// They apply whichever audit type the entity resolves to.
    pub fn settings_for(&self, context: &str, entity_type: &str) -> Option<&EntitySettings> {
        self.settings
            .get(&(context.to_string(), entity_type.to_string()))
    }

    pub fn resolver(&self) -> EntityMappingResolver<'_> {
        EntityMappingResolver::new(self)
    }
}

impl fmt::Debug for MappingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemas: Vec<&String> = self.schemas.keys().collect();
        schemas.sort();
        f.debug_struct("MappingConfig")
            .field("schemas", &schemas)
            .field("explicit_rules", &self.explicit.len())
            .field("type_rules", &self.by_type.len())
            .field("name_mapper", &self.name_mapper.is_some())
            .field("global_action", &self.global_action.is_some())
            .field("settings", &self.settings.len())
            .finish()
    }
}

/// Accumulates mapping configuration. Nothing is validated until
/// [`build`](Self::build).
#[derive(Default)]
pub struct MappingConfigBuilder {
    schemas: Vec<AuditSchema>,
    explicit: Vec<ExplicitMappingRule>,
    by_type: HashMap<String, MappingRule>,
    name_mapper: Option<Arc<NameMapperFn>>,
    global_action: Option<EntityAction>,
    settings: HashMap<(String, String), EntitySettingsBuilder>,
}

impl MappingConfigBuilder {
    /// Register an audit type.
    pub fn schema(mut self, schema: AuditSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Map an entity type to a fixed audit type.
    pub fn map(self, entity_type: impl Into<String>, audit_type: impl Into<String>) -> Self {
        self.map_rule(entity_type, MappingRule::to(audit_type))
    }

    /// Map an entity type to a fixed audit type with an inclusion action.
    pub fn map_with_action(
        self,
        entity_type: impl Into<String>,
        audit_type: impl Into<String>,
        action: EntityAction,
    ) -> Self {
        self.map_rule(entity_type, MappingRule::to(audit_type).with_action(action))
    }

    /// Map an entity type through a selector that may fan out to several
    /// audit types, or exclude the entity by returning `None`.
    pub fn map_selector(self, entity_type: impl Into<String>, selector: TargetSelector) -> Self {
        self.map_rule(entity_type, MappingRule::new(selector))
    }

    /// Set the type-keyed rule for an entity type, replacing any earlier one.
    pub fn map_rule(mut self, entity_type: impl Into<String>, rule: MappingRule) -> Self {
        let entity_type = entity_type.into();
        if self.by_type.insert(entity_type.clone(), rule).is_some() {
            tracing::debug!(entity_type = %entity_type, "Replacing type-keyed mapping rule");
        }
        self
    }

    /// Append an explicit rule. Explicit rules are evaluated in registration
    /// order before the type-keyed table; the first match wins.
    pub fn map_explicit(mut self, predicate: EntityPredicate, rule: MappingRule) -> Self {
        self.explicit.push(ExplicitMappingRule::new(predicate, rule));
        self
    }

    /// Fallback mapping from entity type name to audit type name, used for
    /// entity types that have no type-keyed rule. It carries no action.
    pub fn map_names<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.name_mapper = Some(Arc::new(mapper));
        self
    }

    /// Inclusion action applied to every mapped entity after its
    /// rule-specific action.
    pub fn global_action(mut self, action: EntityAction) -> Self {
        self.global_action = Some(action);
        self
    }

    /// Configure property transforms for an entity type within a context.
    /// Calling this again for the same pair extends the earlier settings.
    pub fn settings<F>(
        mut self,
        context: impl Into<String>,
        entity_type: impl Into<String>,
        configure: F,
    ) -> Self
    where
        F: FnOnce(EntitySettingsBuilder) -> EntitySettingsBuilder,
    {
        let key = (context.into(), entity_type.into());
        let current = self.settings.remove(&key).unwrap_or_default();
        self.settings.insert(key, configure(current));
        self
    }

    /// Add the audit types, fixed entity mappings and settings of a
    /// declarative definition. Code-only hooks can be added afterwards.
    pub fn definition(mut self, definition: &MappingDefinition) -> Self {
        for (name, properties) in &definition.audit_types {
            self = self.schema(AuditSchema::new(name.clone(), properties.iter().cloned()));
        }
        for (entity_type, audit_type) in &definition.entities {
            self = self.map(entity_type.clone(), audit_type.clone());
        }
        for entry in &definition.settings {
            self = self.settings(entry.context.clone(), entry.entity_type.clone(), |mut s| {
                for property in &entry.ignore {
                    s = s.ignore(property.clone());
                }
                for (property, value) in &entry.overrides {
                    s = s.override_value(property.clone(), value.clone());
                }
                s
            });
        }
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<MappingConfig, MappingError> {
        let mut schemas = HashMap::new();
        for schema in self.schemas {
            let name = schema.name().to_string();
            if schemas.insert(name.clone(), Arc::new(schema)).is_some() {
                return Err(MappingError::DuplicateSchema(name));
            }
        }

        let fixed_targets = self
            .explicit
            .iter()
            .map(|e| &e.rule)
            .chain(self.by_type.values())
            .filter_map(|rule| rule.target.fixed_name());
        for target in fixed_targets {
            if !schemas.contains_key(target) {
                return Err(MappingError::UnknownAuditType(target.to_string()));
            }
        }

        let mut settings = HashMap::new();
        for ((context, entity_type), builder) in self.settings {
            let targets = candidate_targets(
                &schemas,
                &self.explicit,
                self.by_type.get(&entity_type),
                self.name_mapper.as_deref(),
                &entity_type,
            );
            if targets.is_empty() {
                return Err(MappingError::UnmappedEntityType(entity_type));
            }
            let built = builder.build(&entity_type, &targets)?;
            settings.insert((context, entity_type), built);
        }

        tracing::debug!(
            schemas = schemas.len(),
            explicit_rules = self.explicit.len(),
            type_rules = self.by_type.len(),
            "Mapping configuration built"
        );

        Ok(MappingConfig {
            schemas,
            explicit: self.explicit,
            by_type: self.by_type,
            name_mapper: self.name_mapper,
            global_action: self.global_action,
            settings,
        })
    }
}

/// Audit types an entity type can resolve to. Any selector on the way makes
/// every registered audit type a candidate.
fn candidate_targets<'s>(
    schemas: &'s HashMap<String, Arc<AuditSchema>>,
    explicit: &[ExplicitMappingRule],
    type_rule: Option<&MappingRule>,
    name_mapper: Option<&NameMapperFn>,
    entity_type: &str,
) -> Vec<&'s AuditSchema> {
    let mut names = Vec::new();
    let rules = explicit.iter().map(|e| &e.rule).chain(type_rule);
    for rule in rules {
        match rule.target.fixed_name() {
            Some(name) => names.push(name.to_string()),
            None => return schemas.values().map(Arc::as_ref).collect(),
        }
    }
    if type_rule.is_none() {
        names.extend(name_mapper.and_then(|mapper| mapper(entity_type)));
    }

    names.sort();
    names.dedup();
    names
        .iter()
        .filter_map(|name| schemas.get(name))
        .map(Arc::as_ref)
        .collect()
}

/// Result of resolving one snapshot.
#[derive(Debug, Clone)]
pub struct ResolvedMapping<'a> {
    pub target: Arc<AuditSchema>,
    /// Rule-specific inclusion action. Only the matched rule's action is
    /// ever returned.
    pub action: Option<&'a EntityAction>,
    pub source: RuleSource,
}

/// Decides which audit type, if any, a changed entity maps to.
pub struct EntityMappingResolver<'a> {
    config: &'a MappingConfig,
}

impl<'a> EntityMappingResolver<'a> {
    pub fn new(config: &'a MappingConfig) -> Self {
        Self { config }
    }

    /// Resolve a snapshot. `Ok(None)` means the entity is excluded.
    ///
    /// Hook failures propagate; an entity is never silently dropped because
    /// its predicate or selector failed.
    pub async fn resolve(
        &self,
        snapshot: &EntitySnapshot,
    ) -> Result<Option<ResolvedMapping<'a>>, AuditError> {
        let entity_type = snapshot.entity_type.as_str();

        for (index, explicit) in self.config.explicit.iter().enumerate() {
            let matched = explicit
                .predicate
                .evaluate(snapshot)
                .await
                .map_err(|e| AuditError::hook(HookStage::Predicate, entity_type, e))?;
            if matched {
                // A matching explicit rule is final, even when it excludes.
                let target = explicit
                    .rule
                    .target
                    .select(snapshot)
                    .await
                    .map_err(|e| AuditError::hook(HookStage::Selector, entity_type, e))?;
                return self.finish(
                    snapshot,
                    target,
                    explicit.rule.action(),
                    RuleSource::Explicit(index),
                );
            }
        }

        if let Some(rule) = self.config.by_type.get(entity_type) {
            let target = rule
                .target
                .select(snapshot)
                .await
                .map_err(|e| AuditError::hook(HookStage::Selector, entity_type, e))?;
            return self.finish(snapshot, target, rule.action(), RuleSource::TypeKeyed);
        }

        if let Some(mapper) = &self.config.name_mapper {
            let target = mapper(entity_type);
            return self.finish(snapshot, target, None, RuleSource::NameMapper);
        }

        tracing::debug!(entity_type = %entity_type, "No mapping rule, entity excluded");
        Ok(None)
    }

    /// Synchronous form of [`resolve`](Self::resolve).
    pub fn resolve_blocking(
        &self,
        snapshot: &EntitySnapshot,
    ) -> Result<Option<ResolvedMapping<'a>>, AuditError> {
        futures::executor::block_on(self.resolve(snapshot))
    }

    fn finish(
        &self,
        snapshot: &EntitySnapshot,
        target: Option<String>,
        action: Option<&'a EntityAction>,
        source: RuleSource,
    ) -> Result<Option<ResolvedMapping<'a>>, AuditError> {
        let Some(target) = target else {
            tracing::debug!(
                entity_type = %snapshot.entity_type,
                rule = ?source,
                "Selector returned no audit type, entity excluded"
            );
            return Ok(None);
        };

        let schema = self
            .config
            .schema(&target)
            .ok_or_else(|| AuditError::UnknownAuditType(target.clone()))?;

        Ok(Some(ResolvedMapping {
            target: Arc::clone(schema),
            action,
            source,
        }))
    }
}
