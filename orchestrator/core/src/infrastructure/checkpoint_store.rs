// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Checkpoint Store (C6, spec §4.5 "Persistence"): a durable, bounded
//! key-value store of partial transform state, debounced to a single JSON
//! file on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::domain::checkpoint::Checkpoint;

const DEFAULT_CAPACITY: usize = 50;
const DEFAULT_RETENTION: chrono::Duration = chrono::Duration::hours(24);
const DEBOUNCE: Duration = Duration::from_secs(1);

pub struct CheckpointStore {
    path: PathBuf,
    capacity: usize,
    retention: chrono::Duration,
    entries: RwLock<HashMap<String, Checkpoint>>,
    flush_lock: Mutex<()>,
    pending_flush: std::sync::atomic::AtomicBool,
}

impl CheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            capacity: DEFAULT_CAPACITY,
            retention: DEFAULT_RETENTION,
            entries: RwLock::new(HashMap::new()),
            flush_lock: Mutex::new(()),
            pending_flush: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Loads the on-disk map; purges expired entries (spec §4.5 "purged on
    /// startup"). Tolerates a missing or corrupt file by starting empty.
    pub async fn load(&self) -> anyhow::Result<()> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let parsed: HashMap<String, Checkpoint> = match serde_json::from_slice(&raw) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "checkpoint file corrupt, starting empty");
                HashMap::new()
            }
        };
        let now = Utc::now();
        let retained: HashMap<String, Checkpoint> =
            parsed.into_iter().filter(|(_, cp)| !cp.is_expired(now, self.retention)).collect();
        *self.entries.write().await = retained;
        Ok(())
    }

    pub async fn get(&self, operation_id: &str) -> Option<Checkpoint> {
        self.entries.read().await.get(operation_id).cloned()
    }

    /// Inserts or replaces a checkpoint, enforcing the bounded capacity by
    /// LRU eviction on `updated_at` (spec §4.5), then schedules a debounced
    /// write.
    pub async fn put(self: &Arc<Self>, checkpoint: Checkpoint) {
        {
            let mut entries = self.entries.write().await;
            entries.insert(checkpoint.operation_id.clone(), checkpoint);
            if entries.len() > self.capacity {
                if let Some(oldest_id) = entries
                    .values()
                    .min_by_key(|cp| cp.updated_at)
                    .map(|cp| cp.operation_id.clone())
                {
                    entries.remove(&oldest_id);
                }
            }
        }
        self.schedule_flush();
    }

    /// Removals flush immediately (spec §4.5).
    pub async fn remove(&self, operation_id: &str) -> anyhow::Result<()> {
        self.entries.write().await.remove(operation_id);
        self.flush_now().await
    }

    /// Opportunistic purge of entries older than the configured retention
    /// (spec §4.5 "purged ... opportunistically thereafter").
    pub async fn purge_expired(self: &Arc<Self>) {
        let now = Utc::now();
        let mut removed_any = false;
        {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, cp| !cp.is_expired(now, self.retention));
            removed_any = entries.len() != before;
        }
        if removed_any {
            self.schedule_flush();
        }
    }

    fn schedule_flush(self: &Arc<Self>) {
        if self
            .pending_flush
            .compare_exchange(false, true, std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(Instant::now() + DEBOUNCE).await;
            store.pending_flush.store(false, std::sync::atomic::Ordering::SeqCst);
            if let Err(e) = store.flush_now().await {
                tracing::warn!(error = %e, "failed to flush checkpoint store");
            }
        });
    }

    async fn flush_now(&self) -> anyhow::Result<()> {
        let _guard = self.flush_lock.lock().await;
        let entries = self.entries.read().await;
        let json = serde_json::to_vec_pretty(&*entries)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Forces an immediate write regardless of the debounce window, for use
    /// at graceful shutdown (SPEC_FULL "Graceful shutdown").
    pub async fn flush(&self) {
        if let Err(e) = self.flush_now().await {
            tracing::warn!(error = %e, "failed to flush checkpoint store on shutdown");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checkpoint::Stage;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path().join("checkpoints.json")));
        let cp = Checkpoint::new("op-1", "alpha", "source".to_string());
        store.put(cp.clone()).await;
        let fetched = store.get("op-1").await.unwrap();
        assert_eq!(fetched.stage, Stage::Backup);
    }

    #[tokio::test]
    async fn capacity_overflow_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CheckpointStore::new(dir.path().join("checkpoints.json")).with_capacity(2));
        for i in 0..3 {
            let mut cp = Checkpoint::new(format!("op-{i}"), "alpha", "source".to_string());
            cp.updated_at = Utc::now() - chrono::Duration::seconds(10 - i);
            store.put(cp).await;
        }
        assert_eq!(store.len().await, 2);
        assert!(store.get("op-0").await.is_none());
    }

    #[tokio::test]
    async fn remove_flushes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let store = Arc::new(CheckpointStore::new(path.clone()));
        let cp = Checkpoint::new("op-1", "alpha", "source".to_string());
        store.put(cp).await;
        store.remove("op-1").await.unwrap();
        let on_disk: HashMap<String, Checkpoint> =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert!(on_disk.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let store = CheckpointStore::new(path);
        store.load().await.unwrap();
        assert_eq!(store.len().await, 0);
    }
}
