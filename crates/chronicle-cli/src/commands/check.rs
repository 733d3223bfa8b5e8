//! `chronicle check` command implementation.
//!
//! Validates a configuration file:
//! - JSON Schema validation against `schemas/ChronicleConfig.schema.json`
//! - Loading and semantic validation of the audit section
//! - Building the declarative entity mappings
//! - Warnings for settings that are valid but rarely intended

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chronicle_audit::MappingConfig;
use chronicle_core::{ChronicleConfig, CreationPolicy, SinkBackend};

/// Compiled into the binary so validation works without external files.
const CONFIG_SCHEMA: &str = include_str!("../../../../schemas/ChronicleConfig.schema.json");

// ============================================================================
// Check Result Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Check that produced this finding.
    pub category: String,
    pub message: String,
    /// Location within the file (e.g. "/audit/sink").
    pub location: Option<String>,
}

impl CheckFinding {
    fn new(severity: Severity, category: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.to_string(),
            message: message.into(),
            location: None,
        }
    }

    fn error(category: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, message)
    }

    fn warning(category: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, message)
    }

    fn info(category: &str, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, category, message)
    }

    fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    fn extend(&mut self, findings: impl IntoIterator<Item = CheckFinding>) {
        self.findings.extend(findings);
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Print a human-readable summary, most severe findings first.
    pub fn print_summary(&self) {
        let mut findings: Vec<&CheckFinding> = self.findings.iter().collect();
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.category.cmp(&b.category))
        });

        for finding in &findings {
            let location = finding
                .location
                .as_deref()
                .map(|l| format!(" [{}]", l))
                .unwrap_or_default();
            println!(
                "  {:<5} [{}]{}: {}",
                finding.severity, finding.category, location, finding.message
            );
        }

        println!();
        if self.error_count() == 0 && self.warning_count() == 0 {
            println!("All checks passed.");
        } else {
            println!(
                "Summary: {} error(s), {} warning(s)",
                self.error_count(),
                self.warning_count()
            );
        }
    }
}

// ============================================================================
// Main Check Runner
// ============================================================================

/// Run all checks without printing anything.
pub fn run_quiet(config_path: &Path) -> Result<CheckResults> {
    let mut results = CheckResults::default();

    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;

    // 1. JSON Schema validation
    results.extend(validate_against_schema(&content)?);
    if results.has_errors() {
        return Ok(results);
    }

    // 2. Load and validate the audit section
    let config = match ChronicleConfig::from_yaml(&content) {
        Ok(config) => config,
        Err(e) => {
            results.findings.push(CheckFinding::error("config", e.to_string()));
            return Ok(results);
        }
    };

    // 3. Declarative mappings
    results.extend(check_mapping(&config));

    // 4. Policy and sink combinations
    results.extend(check_policy(&config));

    Ok(results)
}

/// Run all checks and print the findings.
pub fn run(config_path: &Path) -> Result<()> {
    println!("Checking {}...", config_path.display());
    println!();

    let results = run_quiet(config_path)?;
    results.print_summary();

    if results.has_errors() {
        anyhow::bail!(
            "Configuration has {} error(s).",
            results.error_count()
        );
    }
    Ok(())
}

// ============================================================================
// Check 1: JSON Schema
// ============================================================================

fn validate_against_schema(content: &str) -> Result<Vec<CheckFinding>> {
    let mut findings = Vec::new();

    let schema: JsonValue =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse embedded schema")?;

    let value: JsonValue = match serde_yaml::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            findings.push(CheckFinding::error(
                "json-schema",
                format!("Failed to parse YAML: {}", e),
            ));
            return Ok(findings);
        }
    };

    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| anyhow::anyhow!("Failed to compile JSON schema: {}", e))?;

    for error in validator.iter_errors(&value) {
        let path = error.instance_path().to_string();
        let location = if path.is_empty() {
            "(root)".to_string()
        } else {
            path
        };
        findings.push(CheckFinding::error("json-schema", error.to_string()).with_location(location));
    }

    Ok(findings)
}

// ============================================================================
// Check 2: Mappings
// ============================================================================

fn check_mapping(config: &ChronicleConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();
    let mapping = &config.mapping;

    if mapping.is_empty() {
        findings.push(CheckFinding::info(
            "mapping",
            "No declarative mappings; `replay` infers one audit type per entity type",
        ));
        return findings;
    }

    if let Err(e) = MappingConfig::builder().definition(mapping).build() {
        findings.push(CheckFinding::error("mapping", e.to_string()).with_location("/mapping"));
        return findings;
    }

    let targeted: HashSet<&str> = mapping.entities.values().map(String::as_str).collect();
    for audit_type in mapping.audit_types.keys() {
        if !targeted.contains(audit_type.as_str()) {
            findings.push(
                CheckFinding::warning(
                    "mapping",
                    format!("Audit type '{}' is declared but nothing maps to it", audit_type),
                )
                .with_location(format!("/mapping/audit_types/{}", audit_type)),
            );
        }
    }

    for (i, entry) in mapping.settings.iter().enumerate() {
        let shadowed: Vec<&String> = entry
            .ignore
            .iter()
            .filter(|p| entry.overrides.contains_key(p.as_str()))
            .collect();
        for property in shadowed {
            findings.push(
                CheckFinding::warning(
                    "mapping",
                    format!(
                        "Property '{}' is both ignored and overridden; the override never applies",
                        property
                    ),
                )
                .with_location(format!("/mapping/settings/{}", i)),
            );
        }
    }

    findings
}

// ============================================================================
// Check 3: Policy and Sink
// ============================================================================

fn check_policy(config: &ChronicleConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();
    let audit = &config.audit;

    if !audit.enabled {
        findings.push(
            CheckFinding::warning("policy", "Auditing is disabled; scopes never write")
                .with_location("/audit/enabled"),
        );
        return findings;
    }

    match audit.creation_policy {
        CreationPolicy::Manual => findings.push(
            CheckFinding::info(
                "policy",
                "Manual policy: nothing is written unless the caller saves",
            )
            .with_location("/audit/creation_policy"),
        ),
        CreationPolicy::InsertOnStartReplaceOnEnd if audit.sink.backend == SinkBackend::Console => {
            findings.push(
                CheckFinding::warning(
                    "policy",
                    "The console sink cannot update in place; replaces are printed as new lines",
                )
                .with_location("/audit/sink/backend"),
            )
        }
        _ => {}
    }

    match audit.sink.backend {
        SinkBackend::Null => findings.push(
            CheckFinding::warning("sink", "The null sink discards every event")
                .with_location("/audit/sink/backend"),
        ),
        SinkBackend::Memory => findings.push(
            CheckFinding::info("sink", "The memory sink keeps events for this process only")
                .with_location("/audit/sink/backend"),
        ),
        SinkBackend::File => {
            if let Some(directory) = &audit.sink.directory {
                if !directory.exists() {
                    findings.push(
                        CheckFinding::info(
                            "sink",
                            format!("{} does not exist yet and will be created", directory.display()),
                        )
                        .with_location("/audit/sink/directory"),
                    );
                }
            }
        }
        SinkBackend::Console => {}
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(yaml: &str) -> CheckResults {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chronicle.yaml");
        fs::write(&path, yaml).unwrap();
        run_quiet(&path).unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        let results = check(
            r#"
project: shop
audit:
  creation_policy: insert_on_start_replace_on_end
  sink:
    backend: file
    directory: ./audit
mapping:
  audit_types:
    OrderAudit: [Id, Status]
  entities:
    Order: OrderAudit
"#,
        );
        assert!(!results.has_errors(), "{:?}", results.findings);
        assert_eq!(results.warning_count(), 0);
    }

    #[test]
    fn test_schema_rejects_unknown_keys_and_policies() {
        let results = check("audit:\n  creation_policy: sometimes\n  retries: 3\n");
        assert_eq!(results.error_count(), 2, "{:?}", results.findings);
        assert!(results.findings.iter().all(|f| f.category == "json-schema"));
    }

    #[test]
    fn test_schema_requires_directory_for_file_sink() {
        let results = check("audit:\n  sink:\n    backend: file\n");
        assert!(results.has_errors());
    }

    #[test]
    fn test_unknown_mapping_target_is_an_error() {
        let results = check("mapping:\n  entities:\n    Order: OrderAudit\n");
        let finding = results
            .findings
            .iter()
            .find(|f| f.category == "mapping")
            .unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert!(finding.message.contains("OrderAudit"));
    }

    #[test]
    fn test_ignored_override_is_a_warning() {
        let results = check(
            r#"
mapping:
  audit_types:
    OrderAudit: [Id, Card]
  entities:
    Order: OrderAudit
  settings:
    - context: Shop
      entity_type: Order
      ignore: [Card]
      override:
        Card: "****"
"#,
        );
        assert!(!results.has_errors());
        assert_eq!(results.warning_count(), 1);
    }

    #[test]
    fn test_settings_for_unmapped_entity_type_is_an_error() {
        let results = check(
            r#"
mapping:
  audit_types:
    OrderAudit: [Id, Card]
  entities:
    Order: OrderAudit
  settings:
    - context: Shop
      entity_type: Customer
      ignore: [Id]
"#,
        );
        let finding = results
            .findings
            .iter()
            .find(|f| f.category == "mapping")
            .unwrap();
        assert_eq!(finding.severity, Severity::Error);
        assert!(finding.message.contains("Customer"));
    }

    #[test]
    fn test_disabled_audit_is_a_warning() {
        let results = check("audit:\n  enabled: false\n");
        assert!(!results.has_errors());
        assert_eq!(results.warning_count(), 1);
    }
}
