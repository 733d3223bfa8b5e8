//! Inclusion action chain.
//!
//! The rule-specific action (from whichever rule resolved the entity) runs
//! first; the global action runs only if the specific one included the
//! entity. A missing action counts as `true`. Changes an action makes to the
//! record are kept even when a later action excludes the entity.

use chronicle_core::EntitySnapshot;

use crate::error::{AuditError, HookStage};
use crate::event::AuditEvent;
use crate::hooks::EntityAction;
use crate::schema::AuditRecord;

pub struct EntityActionChain<'a> {
    specific: Option<&'a EntityAction>,
    global: Option<&'a EntityAction>,
}

impl<'a> EntityActionChain<'a> {
    pub fn new(specific: Option<&'a EntityAction>, global: Option<&'a EntityAction>) -> Self {
        Self { specific, global }
    }

    /// Returns whether the entity is included in the trail.
    pub async fn invoke(
        &self,
        event: &AuditEvent,
        snapshot: &EntitySnapshot,
        record: &mut AuditRecord,
    ) -> Result<bool, AuditError> {
        for action in [self.specific, self.global].into_iter().flatten() {
            let include = action
                .invoke(event, snapshot, record)
                .await
                .map_err(|e| AuditError::hook(HookStage::Action, &snapshot.entity_type, e))?;
            if !include {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Synchronous form of [`invoke`](Self::invoke).
    pub fn invoke_blocking(
        &self,
        event: &AuditEvent,
        snapshot: &EntitySnapshot,
        record: &mut AuditRecord,
    ) -> Result<bool, AuditError> {
        futures::executor::block_on(self.invoke(event, snapshot, record))
    }
}
