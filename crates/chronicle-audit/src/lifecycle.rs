//! Audit write lifecycle.
//!
//! Decides whether and when a scope calls `insert` or `replace` on its sink.
//!
//! | Policy | On open | On close |
//! |--------|---------|----------|
//! | `Manual` | - | - (caller saves) |
//! | `InsertOnEnd` | - | insert |
//! | `InsertOnStartReplaceOnEnd` | insert | replace(id from open) |
//! | `InsertOnStartInsertOnEnd` | insert | insert (new id) |
//!
//! States: `Idle -> [EarlyWritten] -> FinalWritten`, plus `Discarded` when
//! the caller gives up on the scope. A failed write leaves the state where
//! it was; nothing is retried here.

use chronicle_core::CreationPolicy;

use crate::error::AuditError;
use crate::event::{AuditEvent, EventId};
use crate::storage::AuditSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    EarlyWritten,
    FinalWritten,
    Discarded,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::EarlyWritten => write!(f, "early_written"),
            Self::FinalWritten => write!(f, "final_written"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditWriteLifecycle {
    policy: CreationPolicy,
    enabled: bool,
    state: LifecycleState,
    event_id: Option<EventId>,
}

impl AuditWriteLifecycle {
    pub fn new(policy: CreationPolicy, enabled: bool) -> Self {
        Self {
            policy,
            enabled,
            state: LifecycleState::Idle,
            event_id: None,
        }
    }

    pub fn policy(&self) -> CreationPolicy {
        self.policy
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Id of the most recent write, if any.
    pub fn event_id(&self) -> Option<&EventId> {
        self.event_id.as_ref()
    }

    /// Whether dropping now would lose a write the policy still owes.
    pub fn requires_final_write(&self) -> bool {
        self.enabled
            && self.policy.writes_on_end()
            && matches!(self.state, LifecycleState::Idle | LifecycleState::EarlyWritten)
    }

    /// Open-time transition.
    pub async fn on_open(
        &mut self,
        sink: &dyn AuditSink,
        event: &AuditEvent,
    ) -> Result<(), AuditError> {
        if self.state != LifecycleState::Idle {
            return Err(AuditError::InvalidState(format!(
                "cannot open a scope in state {}",
                self.state
            )));
        }
        if !self.enabled || !self.policy.writes_on_start() {
            return Ok(());
        }

        let event_id = sink.insert(event).await?;
        tracing::debug!(event_id = %event_id, policy = %self.policy, "Early audit insert");
        self.event_id = Some(event_id);
        self.state = LifecycleState::EarlyWritten;
        Ok(())
    }

    /// Close-time transition.
    pub async fn on_close(
        &mut self,
        sink: &dyn AuditSink,
        event: &AuditEvent,
    ) -> Result<(), AuditError> {
        match self.state {
            LifecycleState::FinalWritten => return Err(AuditError::AlreadyFinalized),
            LifecycleState::Discarded => {
                return Err(AuditError::InvalidState(
                    "cannot close a discarded scope".to_string(),
                ));
            }
            LifecycleState::Idle | LifecycleState::EarlyWritten => {}
        }

        if !self.enabled {
            self.state = LifecycleState::FinalWritten;
            return Ok(());
        }

        match self.policy {
            CreationPolicy::Manual => return Ok(()),
            CreationPolicy::InsertOnEnd => {
                let event_id = sink.insert(event).await?;
                tracing::debug!(event_id = %event_id, "Final audit insert");
                self.event_id = Some(event_id);
            }
            CreationPolicy::InsertOnStartReplaceOnEnd => {
                let event_id = self.early_event_id()?;
                sink.replace(&event_id, event).await?;
                tracing::debug!(event_id = %event_id, "Final audit replace");
            }
            CreationPolicy::InsertOnStartInsertOnEnd => {
                self.early_event_id()?;
                let event_id = sink.insert(event).await?;
                tracing::debug!(event_id = %event_id, "Final audit insert");
                self.event_id = Some(event_id);
            }
        }

        self.state = LifecycleState::FinalWritten;
        Ok(())
    }

    /// Explicit write for `Manual` scopes: insert when no id is held yet (or
    /// when `force_insert`), replace otherwise. Returns `None` when auditing
    /// is disabled.
    pub async fn save(
        &mut self,
        sink: &dyn AuditSink,
        event: &AuditEvent,
        force_insert: bool,
    ) -> Result<Option<EventId>, AuditError> {
        if self.policy != CreationPolicy::Manual {
            return Err(AuditError::InvalidState(format!(
                "explicit saves require the manual policy, scope uses {}",
                self.policy
            )));
        }
        if self.state == LifecycleState::Discarded {
            return Err(AuditError::InvalidState(
                "cannot save a discarded scope".to_string(),
            ));
        }
        if !self.enabled {
            return Ok(None);
        }

        let existing = if force_insert {
            None
        } else {
            self.event_id.clone()
        };
        match existing {
            Some(event_id) => {
                sink.replace(&event_id, event).await?;
                tracing::debug!(event_id = %event_id, "Manual audit replace");
            }
            None => {
                let event_id = sink.insert(event).await?;
                tracing::debug!(event_id = %event_id, "Manual audit insert");
                self.event_id = Some(event_id);
            }
        }
        Ok(self.event_id.clone())
    }

    /// Give up on the scope without any further write.
    pub fn discard(&mut self) {
        self.state = LifecycleState::Discarded;
    }

    // A close-time write that depends on the open-time insert needs its id.
    fn early_event_id(&self) -> Result<EventId, AuditError> {
        match (&self.state, &self.event_id) {
            (LifecycleState::EarlyWritten, Some(event_id)) => Ok(event_id.clone()),
            _ => Err(AuditError::InvalidState(format!(
                "policy {} requires a successful insert when the scope opens",
                self.policy
            ))),
        }
    }
}
