//! Audit sinks.

use async_trait::async_trait;
use chronicle_core::config::audit::{SinkBackend, SinkConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::AuditError;
use crate::event::{AuditEvent, EventId};

/// Storage or transport target that durably records audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Store a new event and return the id the sink assigned to it.
    async fn insert(&self, event: &AuditEvent) -> Result<EventId, AuditError>;

    /// Overwrite a previously inserted event.
    async fn replace(&self, event_id: &EventId, event: &AuditEvent) -> Result<(), AuditError>;

    /// Get an event by id. Sinks that cannot read back return `None`.
    async fn get(&self, _event_id: &EventId) -> Result<Option<AuditEvent>, AuditError> {
        Ok(None)
    }
}

/// Create a sink based on configuration.
pub fn create_sink(config: &SinkConfig) -> Result<Arc<dyn AuditSink>, AuditError> {
    match config.backend {
        SinkBackend::Memory => Ok(Arc::new(InMemorySink::new())),
        SinkBackend::Console => Ok(Arc::new(ConsoleSink)),
        SinkBackend::Null => Ok(Arc::new(NullSink)),
        SinkBackend::File => {
            let directory = config.directory.as_deref().ok_or_else(|| {
                AuditError::Sink("file backend requires a directory".to_string())
            })?;
            Ok(Arc::new(FileSink::new(directory)?))
        }
    }
}

/// Discards every event.
pub struct NullSink;

#[async_trait]
impl AuditSink for NullSink {
    async fn insert(&self, _event: &AuditEvent) -> Result<EventId, AuditError> {
        Ok(EventId::generate())
    }

    async fn replace(&self, _event_id: &EventId, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Console sink (one JSON line per write on stdout).
pub struct ConsoleSink;

#[async_trait]
impl AuditSink for ConsoleSink {
    async fn insert(&self, event: &AuditEvent) -> Result<EventId, AuditError> {
        let event_id = EventId::generate();
        let json = serde_json::to_string(event)?;
        println!("{{\"event_id\":\"{}\",\"event\":{}}}", event_id, json);
        Ok(event_id)
    }

    async fn replace(&self, event_id: &EventId, event: &AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(event)?;
        println!("{{\"event_id\":\"{}\",\"replaces\":true,\"event\":{}}}", event_id, json);
        Ok(())
    }
}

/// A write observed by [`InMemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Insert(EventId),
    Replace(EventId),
}

/// Keeps events in memory, along with a journal of every write.
#[derive(Default)]
pub struct InMemorySink {
    events: RwLock<HashMap<EventId, AuditEvent>>,
    calls: Mutex<Vec<SinkCall>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every insert/replace, in order.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn insert_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Insert(_)))
            .count()
    }

    pub fn replace_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Replace(_)))
            .count()
    }

    /// Number of distinct stored events.
    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, call: SinkCall) -> Result<(), AuditError> {
        self.calls
            .lock()
            .map_err(|e| AuditError::Sink(format!("Failed to acquire journal lock: {}", e)))?
            .push(call);
        Ok(())
    }
}

#[async_trait]
impl AuditSink for InMemorySink {
    async fn insert(&self, event: &AuditEvent) -> Result<EventId, AuditError> {
        let event_id = EventId::generate();
        self.events
            .write()
            .map_err(|e| AuditError::Sink(format!("Failed to acquire write lock: {}", e)))?
            .insert(event_id.clone(), event.clone());
        self.record(SinkCall::Insert(event_id.clone()))?;
        Ok(event_id)
    }

    async fn replace(&self, event_id: &EventId, event: &AuditEvent) -> Result<(), AuditError> {
        {
            let mut events = self
                .events
                .write()
                .map_err(|e| AuditError::Sink(format!("Failed to acquire write lock: {}", e)))?;
            let Some(stored) = events.get_mut(event_id) else {
                return Err(AuditError::EventNotFound(event_id.clone()));
            };
            *stored = event.clone();
        }
        self.record(SinkCall::Replace(event_id.clone()))
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<AuditEvent>, AuditError> {
        let events = self
            .events
            .read()
            .map_err(|e| AuditError::Sink(format!("Failed to acquire read lock: {}", e)))?;
        Ok(events.get(event_id).cloned())
    }
}

/// File sink: one pretty-printed JSON document per event, named by id.
/// Replacing an event overwrites its file.
pub struct FileSink {
    directory: PathBuf,
}

impl FileSink {
    /// Create a file sink, creating the directory if needed.
    pub fn new(directory: impl AsRef<Path>) -> Result<Self, AuditError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    fn path_for(&self, event_id: &EventId) -> PathBuf {
        self.directory.join(format!("{}.json", event_id))
    }

    fn write(&self, path: &Path, event: &AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string_pretty(event)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for FileSink {
    async fn insert(&self, event: &AuditEvent) -> Result<EventId, AuditError> {
        let event_id = EventId::generate();
        self.write(&self.path_for(&event_id), event)?;
        Ok(event_id)
    }

    async fn replace(&self, event_id: &EventId, event: &AuditEvent) -> Result<(), AuditError> {
        let path = self.path_for(event_id);
        if !path.exists() {
            return Err(AuditError::EventNotFound(event_id.clone()));
        }
        self.write(&path, event)
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<AuditEvent>, AuditError> {
        let path = self.path_for(event_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}
