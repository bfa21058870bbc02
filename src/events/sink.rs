//! Event sink implementations for different output targets

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::TaskEvent;

/// Destination for flushed event batches
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver a batch; either the whole batch is accepted or an error is returned
    async fn emit(&self, events: &[TaskEvent]) -> Result<()>;
}

/// In-memory sink for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    batches: Mutex<Vec<Vec<TaskEvent>>>,
    failing: AtomicBool,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent emits fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All delivered events, in delivery order
    pub fn events(&self) -> Vec<TaskEvent> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, events: &[TaskEvent]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("event sink unavailable"));
        }
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(events.to_vec());
        Ok(())
    }
}

/// File-based event sink in JSONL format
///
/// A batch is serialized up front and written with a single append, so a
/// serialization failure never leaves part of a batch in the file. If the
/// append itself fails, the file is truncated back to its length before the
/// batch. Only when that truncation also fails can a retried flush repeat the
/// lines that made it to disk; readers then see the batch at least once.
/// Batches are serialized within one sink instance, not across processes.
pub struct JsonlEventSink {
    file_path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlEventSink {
    /// Create a new JSONL event sink
    pub async fn new(file_path: PathBuf) -> Result<Self> {
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create event directory")?;
        }
        Ok(Self {
            file_path,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Serialize events to JSONL format
fn serialize_events_to_jsonl(events: &[TaskEvent]) -> Result<String> {
    let mut out = String::new();
    for event in events {
        out.push_str(&serde_json::to_string(event)?);
        out.push('\n');
    }
    Ok(out)
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn emit(&self, events: &[TaskEvent]) -> Result<()> {
        let content = serialize_events_to_jsonl(events)?;

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .context("Failed to open event file")?;
        let start = file
            .metadata()
            .await
            .context("Failed to stat event file")?
            .len();

        if let Err(err) = append(&mut file, content.as_bytes()).await {
            discard_partial_batch(&file, start, &self.file_path).await;
            return Err(err).context("Failed to append events");
        }

        debug!("Wrote {} events to {:?}", events.len(), self.file_path);
        Ok(())
    }
}

async fn append(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}

// Drop whatever part of a failed batch reached the file.
async fn discard_partial_batch(file: &File, start: u64, path: &Path) {
    if let Err(err) = file.set_len(start).await {
        warn!(
            "Could not discard partial event batch in {:?}, it may be repeated: {}",
            path, err
        );
    }
}
