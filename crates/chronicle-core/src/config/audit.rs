//! Audit lifecycle and sink configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for audit scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether auditing is enabled. Disabled scopes never touch the sink.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// When the sink is written relative to the guarded operation.
    #[serde(default)]
    pub creation_policy: CreationPolicy,

    /// Event type label. `{context}` and `{operation}` are substituted.
    #[serde(default = "default_event_type")]
    pub event_type: String,

    /// Sink configuration.
    #[serde(default)]
    pub sink: SinkConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            creation_policy: CreationPolicy::default(),
            event_type: default_event_type(),
            sink: SinkConfig::default(),
        }
    }
}

impl AuditConfig {
    /// Render the event type label for a context and operation name.
    pub fn event_type_for(&self, context: &str, operation: &str) -> String {
        self.event_type
            .replace("{context}", context)
            .replace("{operation}", operation)
    }

    /// Check settings that can only be validated together.
    pub fn validate(&self) -> Result<(), String> {
        if self.sink.backend == SinkBackend::File && self.sink.directory.is_none() {
            return Err("sink.directory is required for the file backend".to_string());
        }
        if self.event_type.trim().is_empty() {
            return Err("event_type must not be empty".to_string());
        }
        Ok(())
    }
}

/// When, and how many times, a scope writes its event to the sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreationPolicy {
    /// Nothing is written unless the caller saves explicitly.
    Manual,
    /// One insert when the scope closes.
    #[default]
    InsertOnEnd,
    /// Insert when the scope opens, replace that event when it closes.
    InsertOnStartReplaceOnEnd,
    /// Insert when the scope opens and insert a second event when it closes.
    InsertOnStartInsertOnEnd,
}

impl CreationPolicy {
    /// Whether the policy writes when the scope opens.
    pub fn writes_on_start(&self) -> bool {
        matches!(
            self,
            Self::InsertOnStartReplaceOnEnd | Self::InsertOnStartInsertOnEnd
        )
    }

    /// Whether the policy writes when the scope closes.
    pub fn writes_on_end(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

impl std::fmt::Display for CreationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::InsertOnEnd => write!(f, "insert_on_end"),
            Self::InsertOnStartReplaceOnEnd => write!(f, "insert_on_start_replace_on_end"),
            Self::InsertOnStartInsertOnEnd => write!(f, "insert_on_start_insert_on_end"),
        }
    }
}

/// Sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SinkConfig {
    /// Sink backend type.
    #[serde(default)]
    pub backend: SinkBackend,

    /// Output directory (for file backend).
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Sink backend type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    /// Keep events in memory.
    #[default]
    Memory,
    /// One JSON document per event in a directory.
    File,
    /// Print events to stdout.
    Console,
    /// Discard everything.
    Null,
}

fn default_enabled() -> bool {
    true
}

fn default_event_type() -> String {
    "{context}:{operation}".to_string()
}
