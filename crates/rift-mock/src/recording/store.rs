//! Recorder implementations.

use super::types::RecordedPair;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Pairs kept by [`InMemoryRecorder::new`].
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Sink for recorded pairs.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn insert(&self, pair: RecordedPair) -> anyhow::Result<()>;
}

/// Keeps the most recent pairs in process memory, oldest first.
///
/// Once `capacity` pairs are held, each insert drops the oldest one.
pub struct InMemoryRecorder {
    pairs: RwLock<VecDeque<RecordedPair>>,
    capacity: usize,
}

impl Default for InMemoryRecorder {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pairs: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of all recorded pairs
    pub fn list(&self) -> Vec<RecordedPair> {
        self.pairs.read().iter().cloned().collect()
    }

    /// Pairs recorded for one port
    pub fn list_for_port(&self, port: u16) -> Vec<RecordedPair> {
        self.pairs
            .read()
            .iter()
            .filter(|p| p.port == port)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.pairs.write().clear();
    }

    pub fn len(&self) -> usize {
        self.pairs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.read().is_empty()
    }
}

#[async_trait]
impl Recorder for InMemoryRecorder {
    async fn insert(&self, pair: RecordedPair) -> anyhow::Result<()> {
        debug!(
            "Recording {} {} on port {} -> {}",
            pair.request.method, pair.request.url, pair.port, pair.response.status
        );
        let mut pairs = self.pairs.write();
        if pairs.len() >= self.capacity {
            pairs.pop_front();
        }
        pairs.push_back(pair);
        Ok(())
    }
}

/// Appends each pair to a file as one JSON line.
pub struct FileRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileRecorder {
    /// Open `path` for appending, creating it if needed.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open record file {}", path.display()))?;
        info!("Recording pairs to {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Recorder for FileRecorder {
    async fn insert(&self, pair: RecordedPair) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(&pair)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Discards everything.
pub struct NoOpRecorder;

#[async_trait]
impl Recorder for NoOpRecorder {
    async fn insert(&self, _pair: RecordedPair) -> anyhow::Result<()> {
        Ok(())
    }
}
