//! Configuration types for Chronicle.
//!
//! Configuration is loaded from a single YAML file (chronicle.yaml): whether
//! auditing is on, which creation policy scopes use, which sink they write
//! to, and optionally the declarative part of the entity mappings.

pub mod audit;
pub mod mapping;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use audit::{AuditConfig, CreationPolicy, SinkBackend, SinkConfig};
pub use mapping::{MappingDefinition, SettingsDefinition};

/// Complete Chronicle configuration loaded from file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChronicleConfig {
    /// Project name.
    #[serde(default)]
    pub project: Option<String>,

    /// Audit scope configuration.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Declarative entity mappings.
    #[serde(default, skip_serializing_if = "MappingDefinition::is_empty")]
    pub mapping: MappingDefinition,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChronicleConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.audit.validate().map_err(ConfigError::Config)?;
        Ok(config)
    }
}
