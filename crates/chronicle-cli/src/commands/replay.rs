//! `chronicle replay` command implementation.
//!
//! Pushes a recorded change-set (JSON) through one audit scope, using the
//! creation policy and sink from the configuration file. Without declarative
//! mappings every entity type `T` is audited as `TAudit`, declaring every
//! column seen for `T` in the change-set.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chronicle_audit::{
    AuditEvent, AuditScope, AuditScopeOptions, CreationPolicy, EntityAuditor, MappingConfig,
    create_sink,
};
use chronicle_core::{ChangeSet, ChronicleConfig, MappingDefinition};

/// Options for a replay run.
#[derive(Debug, Clone)]
pub struct ReplayOptions<'a> {
    pub config_path: &'a Path,
    pub changes_path: &'a Path,
    pub operation: &'a str,
    /// Print the final event as JSON on stdout.
    pub json: bool,
}

pub async fn run(options: ReplayOptions<'_>) -> Result<()> {
    let event = replay(&options).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&event)?);
    } else {
        println!("{}", event.to_log_line());
    }
    Ok(())
}

/// Replay the change-set and return the event as it was last written.
pub async fn replay(options: &ReplayOptions<'_>) -> Result<AuditEvent> {
    let config = ChronicleConfig::from_file(options.config_path)
        .with_context(|| format!("Failed to load {}", options.config_path.display()))?;

    let content = fs::read_to_string(options.changes_path)
        .with_context(|| format!("Failed to read {}", options.changes_path.display()))?;
    let changes: ChangeSet = serde_json::from_str(&content)
        .with_context(|| format!("Invalid change-set in {}", options.changes_path.display()))?;

    let definition = if config.mapping.is_empty() {
        tracing::info!("No mappings configured, inferring audit types from the change-set");
        infer_definition(&changes)
    } else {
        config.mapping.clone()
    };
    let mapping = MappingConfig::builder()
        .definition(&definition)
        .build()
        .context("Invalid mapping configuration")?;
    let auditor = EntityAuditor::new(Arc::new(mapping));

    let sink = create_sink(&config.audit.sink).context("Failed to create audit sink")?;
    let scope_options = AuditScopeOptions::from_config(
        &config.audit,
        &changes.context,
        options.operation,
        sink,
    )
    .custom_field("source", options.changes_path.display().to_string());

    let mut scope = AuditScope::open(scope_options).await?;
    let audited = scope.track(&auditor, &changes).await?;
    tracing::info!(
        entities = changes.entries.len(),
        audited,
        policy = %scope.policy(),
        "Change-set replayed"
    );
    scope.end().await?;

    // Running the command is the explicit save a manual scope waits for.
    if config.audit.enabled && scope.policy() == CreationPolicy::Manual {
        scope.save().await?;
    }

    Ok(scope.event().clone())
}

/// One `<Type>Audit` audit type per entity type, declaring every key and
/// column seen for that type.
pub fn infer_definition(changes: &ChangeSet) -> MappingDefinition {
    let mut columns: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for snapshot in &changes.entries {
        columns.entry(snapshot.entity_type.as_str()).or_default().extend(
            snapshot
                .primary_key
                .keys()
                .chain(snapshot.current.keys())
                .map(String::as_str),
        );
    }

    let mut definition = MappingDefinition::default();
    for (entity_type, properties) in columns {
        let audit_type = format!("{}Audit", entity_type);
        definition.audit_types.insert(
            audit_type.clone(),
            properties.into_iter().map(str::to_string).collect(),
        );
        definition
            .entities
            .insert(entity_type.to_string(), audit_type);
    }
    definition
}
