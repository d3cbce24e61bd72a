#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Event bus used to publish pipeline milestones (attempts, verdicts, batch progress).

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use uuid::Uuid;

/// Event record encoded as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier (`evt-<uuid>`).
    pub id: String,
    /// Component producing the event.
    pub source: String,
    /// Dotted event type (e.g. `safesim.attempt.verified`).
    pub event_type: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Event payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Creates a record with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload,
        }
    }

    /// Whether the event type starts with `prefix` (e.g. `safesim.batch`).
    #[must_use]
    pub fn is_in(&self, prefix: &str) -> bool {
        self.event_type == prefix
            || self
                .event_type
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Event publisher interface.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event.
    async fn publish(&self, event: EventRecord) -> Result<()>;
}

/// In-memory bus keeping a bounded backlog of recent events.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    backlog: Arc<Mutex<VecDeque<EventRecord>>>,
    retain: usize,
}

impl MemoryEventBus {
    /// Creates a bus retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            retain: capacity,
        }
    }

    /// Retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained events whose type falls under `prefix`.
    #[must_use]
    pub fn events_in(&self, prefix: &str) -> Vec<EventRecord> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.is_in(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        let mut backlog = self.backlog.lock();
        if backlog.len() == self.retain {
            backlog.pop_front();
        }
        backlog.push_back(event);
        Ok(())
    }
}

/// Publisher appending events as JSON lines to a file.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates the publisher, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating event directory {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Event log location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening event log {}", self.path.display()))?;
        let mut data = serde_json::to_vec(&event)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}
