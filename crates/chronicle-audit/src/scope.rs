//! Audit scopes.
//!
//! An [`AuditScope`] owns one [`AuditEvent`] for the duration of a
//! unit-of-work, collects the audited entity changes and drives the write
//! lifecycle against its sink.

use chronicle_core::{AuditConfig, ChangeSource, CreationPolicy};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

use crate::auditor::EntityAuditor;
use crate::error::AuditError;
use crate::event::{AuditEvent, EventId};
use crate::lifecycle::{AuditWriteLifecycle, LifecycleState};
use crate::storage::AuditSink;

/// Everything a scope needs before it opens.
pub struct AuditScopeOptions {
    event_type: String,
    policy: CreationPolicy,
    sink: Arc<dyn AuditSink>,
    enabled: bool,
    custom_fields: Map<String, Value>,
}

impl AuditScopeOptions {
    /// Options for an enabled `InsertOnEnd` scope.
    pub fn new(event_type: impl Into<String>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            event_type: event_type.into(),
            policy: CreationPolicy::default(),
            sink,
            enabled: true,
            custom_fields: Map::new(),
        }
    }

    /// Options taken from the runtime configuration.
    pub fn from_config(
        config: &AuditConfig,
        context: &str,
        operation: &str,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self::new(config.event_type_for(context, operation), sink)
            .policy(config.creation_policy)
            .enabled(config.enabled)
    }

    pub fn policy(mut self, policy: CreationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Custom field set on the event before the scope opens, so it is part
    /// of any early write.
    pub fn custom_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom_fields.insert(name.into(), value.into());
        self
    }
}

impl std::fmt::Debug for AuditScopeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditScopeOptions")
            .field("event_type", &self.event_type)
            .field("policy", &self.policy)
            .field("enabled", &self.enabled)
            .field("custom_fields", &self.custom_fields)
            .finish_non_exhaustive()
    }
}

/// One unit-of-work's audit event, its creation policy and its sink.
///
/// A scope is used by one task at a time; open as many as needed
/// concurrently, each with its own lifecycle.
pub struct AuditScope {
    event: AuditEvent,
    lifecycle: AuditWriteLifecycle,
    sink: Arc<dyn AuditSink>,
}

impl AuditScope {
    /// Create the scope and its event without touching the sink.
    pub fn new(options: AuditScopeOptions) -> Self {
        let mut event = AuditEvent::new(options.event_type);
        event.custom_fields = options.custom_fields;
        Self {
            event,
            lifecycle: AuditWriteLifecycle::new(options.policy, options.enabled),
            sink: options.sink,
        }
    }

    /// Create the scope and run the open-time transition.
    pub async fn open(options: AuditScopeOptions) -> Result<Self, AuditError> {
        let mut scope = Self::new(options);
        if let Err(e) = scope.start().await {
            scope.lifecycle.discard();
            return Err(e);
        }
        Ok(scope)
    }

    /// Synchronous form of [`open`](Self::open).
    pub fn open_blocking(options: AuditScopeOptions) -> Result<Self, AuditError> {
        futures::executor::block_on(Self::open(options))
    }

    /// Open-time transition: the early insert for the `InsertOnStart*`
    /// policies.
    pub async fn start(&mut self) -> Result<(), AuditError> {
        self.lifecycle.on_open(self.sink.as_ref(), &self.event).await
    }

    pub fn event(&self) -> &AuditEvent {
        &self.event
    }

    pub fn event_mut(&mut self) -> &mut AuditEvent {
        &mut self.event
    }

    /// Id of the most recent write.
    pub fn event_id(&self) -> Option<&EventId> {
        self.lifecycle.event_id()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn policy(&self) -> CreationPolicy {
        self.lifecycle.policy()
    }

    pub fn set_custom_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.event.set_custom_field(name, value);
    }

    pub fn add_comment(&mut self, comment: impl Into<String>) {
        self.event.add_comment(comment);
    }

    /// Audit every entity of `source` and append the results to the event.
    ///
    /// Returns the number of entity changes added.
    pub async fn track(
        &mut self,
        auditor: &EntityAuditor,
        source: &(dyn ChangeSource + Sync),
    ) -> Result<usize, AuditError> {
        match self.lifecycle.state() {
            LifecycleState::FinalWritten => return Err(AuditError::AlreadyFinalized),
            LifecycleState::Discarded => {
                return Err(AuditError::InvalidState(
                    "cannot track changes on a discarded scope".to_string(),
                ));
            }
            LifecycleState::Idle | LifecycleState::EarlyWritten => {}
        }

        let changes = auditor.audit_changes(&self.event, source).await?;
        let added = changes.len();
        self.event.entity_changes.extend(changes);
        tracing::debug!(
            event_type = %self.event.event_type,
            context = %source.context_name(),
            added,
            "Tracked entity changes"
        );
        Ok(added)
    }

    /// Synchronous form of [`track`](Self::track).
    pub fn track_blocking(
        &mut self,
        auditor: &EntityAuditor,
        source: &(dyn ChangeSource + Sync),
    ) -> Result<usize, AuditError> {
        futures::executor::block_on(self.track(auditor, source))
    }

    /// Close-time transition: stamps the end of the event and performs the
    /// final write the policy asks for. The end is stamped once; closing a
    /// `Manual` scope again keeps the first stamp.
    pub async fn end(&mut self) -> Result<(), AuditError> {
        let open = matches!(
            self.lifecycle.state(),
            LifecycleState::Idle | LifecycleState::EarlyWritten
        );
        if open && self.event.end_date.is_none() {
            self.event.finish();
        }
        self.lifecycle
            .on_close(self.sink.as_ref(), &self.event)
            .await?;

        if self.lifecycle.state() == LifecycleState::FinalWritten {
            tracing::info!(
                event_type = %self.event.event_type,
                event_id = ?self.lifecycle.event_id().map(EventId::as_str),
                policy = %self.lifecycle.policy(),
                entities = self.event.entity_changes.len(),
                "Audit scope finalized"
            );
        }
        Ok(())
    }

    /// Synchronous form of [`end`](Self::end).
    pub fn end_blocking(&mut self) -> Result<(), AuditError> {
        futures::executor::block_on(self.end())
    }

    /// Explicit write for `Manual` scopes. The first save inserts, later
    /// saves replace the same event.
    pub async fn save(&mut self) -> Result<Option<EventId>, AuditError> {
        self.lifecycle
            .save(self.sink.as_ref(), &self.event, false)
            .await
    }

    /// Explicit write for `Manual` scopes that always inserts a new event.
    pub async fn save_as_new(&mut self) -> Result<Option<EventId>, AuditError> {
        self.lifecycle
            .save(self.sink.as_ref(), &self.event, true)
            .await
    }

    pub fn save_blocking(&mut self) -> Result<Option<EventId>, AuditError> {
        futures::executor::block_on(self.save())
    }

    pub fn save_as_new_blocking(&mut self) -> Result<Option<EventId>, AuditError> {
        futures::executor::block_on(self.save_as_new())
    }

    /// Finish the scope without writing anything further.
    pub fn discard(&mut self) {
        tracing::debug!(event_type = %self.event.event_type, "Audit scope discarded");
        self.lifecycle.discard();
    }
}

impl std::fmt::Debug for AuditScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditScope")
            .field("event", &self.event)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Message recorded on the event of a scope dropped before it was closed.
const DROPPED_BEFORE_CLOSE: &str = "audit scope dropped before it was closed";

/// A scope dropped while it still owes a final write (its task was
/// cancelled, or the caller returned early) hands that write to the current
/// tokio runtime, with the event marked as not completed. Outside a runtime
/// the write is lost and only a warning is logged. Discard the scope to skip
/// the write.
impl Drop for AuditScope {
    fn drop(&mut self) {
        if !self.lifecycle.requires_final_write() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                event_type = %self.event.event_type,
                policy = %self.lifecycle.policy(),
                state = %self.lifecycle.state(),
                "Audit scope dropped before its final write, no runtime to complete it"
            );
            return;
        };

        tracing::warn!(
            event_type = %self.event.event_type,
            policy = %self.lifecycle.policy(),
            state = %self.lifecycle.state(),
            "Audit scope dropped before its final write, completing it in the background"
        );

        let mut event = self.event.clone();
        if event.end_date.is_none() {
            event.finish();
        }
        event
            .error
            .get_or_insert_with(|| DROPPED_BEFORE_CLOSE.to_string());
        let mut lifecycle = self.lifecycle.clone();
        let sink = Arc::clone(&self.sink);

        runtime.spawn(async move {
            match lifecycle.on_close(sink.as_ref(), &event).await {
                Ok(()) => tracing::info!(
                    event_type = %event.event_type,
                    event_id = ?lifecycle.event_id().map(EventId::as_str),
                    "Dropped audit scope finalized"
                ),
                Err(e) => tracing::error!(
                    event_type = %event.event_type,
                    error = %e,
                    "Final audit write of dropped scope failed"
                ),
            }
        });
    }
}

/// Run `operation` inside a scope.
///
/// The operation returns its result together with the changes it made.
/// If the open-time write fails the operation is never polled. If the
/// operation (or auditing its changes) fails, the error is recorded on the
/// event and the final write is still attempted before the error is
/// returned. If the returned future is dropped before it completes, the
/// scope's final write runs on the current tokio runtime.
pub async fn audit_operation<T, S, Fut>(
    options: AuditScopeOptions,
    auditor: &EntityAuditor,
    operation: Fut,
) -> Result<T, AuditError>
where
    S: ChangeSource + Sync,
    Fut: Future<Output = anyhow::Result<(T, S)>>,
{
    let mut scope = AuditScope::open(options).await?;

    let failure = match operation.await {
        Ok((value, changes)) => match scope.track(auditor, &changes).await {
            Ok(_) => {
                scope.end().await?;
                return Ok(value);
            }
            Err(e) => e,
        },
        Err(e) => AuditError::Operation(e),
    };

    scope.event.error = Some(failure.to_string());
    if let Err(e) = scope.end().await {
        tracing::error!(
            event_type = %scope.event.event_type,
            error = %e,
            "Final audit write failed after operation error"
        );
    }
    Err(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::EntityAction;
    use crate::mapping::MappingConfig;
    use crate::schema::AuditSchema;
    use crate::storage::{InMemorySink, SinkCall};
    use chronicle_core::{ChangeKind, ChangeSet, EntitySnapshot};
    use serde_json::json;

    fn auditor() -> EntityAuditor {
        EntityAuditor::new(Arc::new(
            MappingConfig::builder()
                .schema(AuditSchema::new("OrderAudit", ["Id", "Total"]))
                .map("Order", "OrderAudit")
                .build()
                .unwrap(),
        ))
    }

    fn changes() -> ChangeSet {
        ChangeSet::new("Shop").push(
            EntitySnapshot::new("Order", "orders", ChangeKind::Insert)
                .with_value("Id", 1)
                .with_value("Total", 40),
        )
    }

    fn options(sink: &Arc<InMemorySink>, policy: CreationPolicy) -> AuditScopeOptions {
        AuditScopeOptions::new("Shop:checkout", sink.clone()).policy(policy)
    }

    #[tokio::test]
    async fn test_replace_carries_tracked_changes() {
        let sink = Arc::new(InMemorySink::new());
        let mut scope = AuditScope::open(options(&sink, CreationPolicy::InsertOnStartReplaceOnEnd))
            .await
            .unwrap();
        let id = scope.event_id().cloned().unwrap();

        // The early write holds the pre-operation state.
        let early = sink.get(&id).await.unwrap().unwrap();
        assert!(early.entity_changes.is_empty());
        assert!(early.end_date.is_none());

        assert_eq!(scope.track(&auditor(), &changes()).await.unwrap(), 1);
        scope.end().await.unwrap();

        let stored = sink.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.entity_changes.len(), 1);
        assert_eq!(stored.entity_changes[0].record.get("Total"), Some(&json!(40)));
        assert!(stored.end_date.is_some());
        assert_eq!(scope.state(), LifecycleState::FinalWritten);
    }

    #[tokio::test]
    async fn test_custom_fields_reach_early_write() {
        let sink = Arc::new(InMemorySink::new());
        let mut scope = AuditScope::open(
            options(&sink, CreationPolicy::InsertOnStartInsertOnEnd).custom_field("user", "ada"),
        )
        .await
        .unwrap();
        let stored = sink.get(scope.event_id().unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.custom_field("user"), Some(&json!("ada")));
        scope.discard();
    }

    #[test]
    fn test_manual_end_keeps_first_stamp() {
        let sink = Arc::new(InMemorySink::new());
        let mut scope = AuditScope::open_blocking(options(&sink, CreationPolicy::Manual)).unwrap();
        scope.end_blocking().unwrap();
        let (end_date, duration_ms) = (scope.event().end_date, scope.event().duration_ms);
        assert!(end_date.is_some());

        std::thread::sleep(std::time::Duration::from_millis(5));
        scope.end_blocking().unwrap();
        assert_eq!(scope.event().end_date, end_date);
        assert_eq!(scope.event().duration_ms, duration_ms);
    }

    #[tokio::test]
    async fn test_dropped_scope_completes_final_write() {
        let sink = Arc::new(InMemorySink::new());
        let mut scope = AuditScope::open(options(&sink, CreationPolicy::InsertOnStartReplaceOnEnd))
            .await
            .unwrap();
        let id = scope.event_id().cloned().unwrap();
        scope.track(&auditor(), &changes()).await.unwrap();
        drop(scope);

        for _ in 0..100 {
            if sink.replace_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            sink.calls(),
            vec![SinkCall::Insert(id.clone()), SinkCall::Replace(id.clone())]
        );
        let stored = sink.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.entity_changes.len(), 1);
        assert!(stored.end_date.is_some());
        assert_eq!(stored.error.as_deref(), Some(DROPPED_BEFORE_CLOSE));
    }

    #[test]
    fn test_dropped_scope_without_runtime_only_warns() {
        let sink = Arc::new(InMemorySink::new());
        let scope =
            AuditScope::open_blocking(options(&sink, CreationPolicy::InsertOnStartReplaceOnEnd))
                .unwrap();
        drop(scope);
        assert_eq!(sink.insert_count(), 1);
        assert_eq!(sink.replace_count(), 0);
    }

    #[tokio::test]
    async fn test_discarded_scope_is_not_completed_on_drop() {
        let sink = Arc::new(InMemorySink::new());
        let mut scope = AuditScope::open(options(&sink, CreationPolicy::InsertOnEnd))
            .await
            .unwrap();
        scope.discard();
        drop(scope);
        tokio::task::yield_now().await;
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_end_twice_is_rejected() {
        let sink = Arc::new(InMemorySink::new());
        let mut scope = AuditScope::open(options(&sink, CreationPolicy::InsertOnEnd))
            .await
            .unwrap();
        scope.end().await.unwrap();
        assert!(matches!(scope.end().await, Err(AuditError::AlreadyFinalized)));
        assert!(matches!(
            scope.track(&auditor(), &changes()).await,
            Err(AuditError::AlreadyFinalized)
        ));
        assert_eq!(sink.insert_count(), 1);
    }

    #[test]
    fn test_manual_save_blocking() {
        let sink = Arc::new(InMemorySink::new());
        let mut scope = AuditScope::open_blocking(options(&sink, CreationPolicy::Manual)).unwrap();
        scope.track_blocking(&auditor(), &changes()).unwrap();
        scope.end_blocking().unwrap();
        assert!(sink.calls().is_empty());

        let first = scope.save_blocking().unwrap().unwrap();
        scope.add_comment("second pass");
        scope.save_blocking().unwrap();
        let copy = scope.save_as_new_blocking().unwrap().unwrap();

        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Insert(first.clone()),
                SinkCall::Replace(first),
                SinkCall::Insert(copy),
            ]
        );
    }

    #[tokio::test]
    async fn test_discard_skips_final_write() {
        let sink = Arc::new(InMemorySink::new());
        let mut scope = AuditScope::open(options(&sink, CreationPolicy::InsertOnStartReplaceOnEnd))
            .await
            .unwrap();
        scope.discard();
        assert!(scope.end().await.is_err());
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_scope_from_config() {
        let sink = Arc::new(InMemorySink::new());
        let config = AuditConfig {
            enabled: false,
            creation_policy: CreationPolicy::InsertOnStartInsertOnEnd,
            ..Default::default()
        };
        let mut scope = AuditScope::open(AuditScopeOptions::from_config(
            &config,
            "Shop",
            "checkout",
            sink.clone(),
        ))
        .await
        .unwrap();
        assert_eq!(scope.event().event_type, "Shop:checkout");
        scope.track(&auditor(), &changes()).await.unwrap();
        scope.end().await.unwrap();
        assert!(sink.calls().is_empty());
        assert_eq!(scope.event_id(), None);
    }

    #[tokio::test]
    async fn test_audit_operation_success() {
        let sink = Arc::new(InMemorySink::new());
        let total = audit_operation(
            options(&sink, CreationPolicy::InsertOnEnd),
            &auditor(),
            async { Ok((40, changes())) },
        )
        .await
        .unwrap();

        assert_eq!(total, 40);
        let SinkCall::Insert(id) = &sink.calls()[0] else {
            panic!("expected an insert");
        };
        let stored = sink.get(id).await.unwrap().unwrap();
        assert_eq!(stored.entity_changes.len(), 1);
        assert!(stored.error.is_none());
    }

    #[tokio::test]
    async fn test_audit_operation_failure_still_writes() {
        let sink = Arc::new(InMemorySink::new());
        let result: Result<(), AuditError> = audit_operation(
            options(&sink, CreationPolicy::InsertOnStartReplaceOnEnd),
            &auditor(),
            async { Err::<((), ChangeSet), _>(anyhow::anyhow!("payment declined")) },
        )
        .await;

        assert!(matches!(result, Err(AuditError::Operation(_))));
        assert_eq!(sink.insert_count(), 1);
        assert_eq!(sink.replace_count(), 1);
        let SinkCall::Insert(id) = &sink.calls()[0] else {
            panic!("expected an insert");
        };
        let stored = sink.get(id).await.unwrap().unwrap();
        assert!(stored.error.as_deref().unwrap_or_default().contains("payment declined"));
    }

    #[tokio::test]
    async fn test_audit_operation_action_error_is_recorded() {
        let sink = Arc::new(InMemorySink::new());
        let auditor = EntityAuditor::new(Arc::new(
            MappingConfig::builder()
                .schema(AuditSchema::new("OrderAudit", ["Id"]))
                .map_with_action(
                    "Order",
                    "OrderAudit",
                    EntityAction::from_fn(|_, _, _| Err(anyhow::anyhow!("lookup failed"))),
                )
                .build()
                .unwrap(),
        ));

        let result = audit_operation(
            options(&sink, CreationPolicy::InsertOnEnd),
            &auditor,
            async { Ok(((), changes())) },
        )
        .await;

        assert!(matches!(result, Err(AuditError::Hook { .. })));
        assert_eq!(sink.insert_count(), 1);
    }
}
