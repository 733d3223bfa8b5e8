//! Error types for the audit crate.

use crate::event::EventId;
use thiserror::Error;

/// Hook that failed while an entity was being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Predicate,
    Selector,
    Override,
    Format,
    Action,
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Predicate => write!(f, "predicate"),
            Self::Selector => write!(f, "type selector"),
            Self::Override => write!(f, "override"),
            Self::Format => write!(f, "format"),
            Self::Action => write!(f, "inclusion action"),
        }
    }
}

/// Errors raised while building a mapping configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// The same audit type was registered twice.
    #[error("audit type '{0}' is registered more than once")]
    DuplicateSchema(String),

    /// A rule names an audit type that was never registered.
    #[error("audit type '{0}' is not registered")]
    UnknownAuditType(String),

    /// Settings exist for an entity type that no rule can map.
    #[error("settings for entity type '{0}', but no rule maps it to an audit type")]
    UnmappedEntityType(String),

    /// A settings entry names a property that no audit type the entity type
    /// can map to declares.
    #[error("no audit type for entity type '{entity_type}' declares property '{property}'")]
    UnknownProperty {
        entity_type: String,
        property: String,
    },

    /// A settings entry uses an empty property name.
    #[error("empty property name in settings for entity type '{0}'")]
    EmptyPropertyName(String),
}

/// Errors that can occur while auditing a unit-of-work.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A configured hook returned an error.
    #[error("{stage} failed for entity '{entity_type}': {source}")]
    Hook {
        stage: HookStage,
        entity_type: String,
        #[source]
        source: anyhow::Error,
    },

    /// A type selector produced an audit type that is not registered.
    #[error("audit type '{0}' is not registered")]
    UnknownAuditType(String),

    /// A property was set that the audit type does not declare.
    #[error("audit type '{audit_type}' has no property '{property}'")]
    UnknownProperty { audit_type: String, property: String },

    /// The sink rejected a write.
    #[error("sink error: {0}")]
    Sink(String),

    /// The sink holds no event with this id.
    #[error("audit event {0} not found")]
    EventNotFound(EventId),

    /// The scope already performed its final write.
    #[error("audit scope already finalized")]
    AlreadyFinalized,

    /// The requested transition is not valid in the scope's current state.
    #[error("invalid audit scope state: {0}")]
    InvalidState(String),

    /// The guarded operation failed.
    #[error("audited operation failed: {0}")]
    Operation(#[source] anyhow::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuditError {
    pub(crate) fn hook(stage: HookStage, entity_type: &str, source: anyhow::Error) -> Self {
        Self::Hook {
            stage,
            entity_type: entity_type.to_string(),
            source,
        }
    }
}
