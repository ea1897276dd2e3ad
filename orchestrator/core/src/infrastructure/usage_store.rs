// Copyright (c) 2026 Montage Broker Contributors
// SPDX-License-Identifier: MIT
//! Persistence for the tool registry's usage statistics (C11, spec §4.8):
//! debounced JSON file at `<assetsDir>/.tool-usage-stats.json`, tolerant of
//! corruption by resetting.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

const DEBOUNCE: Duration = Duration::from_secs(1);

pub struct UsageStore {
    path: PathBuf,
    counts: RwLock<HashMap<String, u64>>,
    flush_lock: Mutex<()>,
    pending_flush: AtomicBool,
}

impl UsageStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            counts: RwLock::new(HashMap::new()),
            flush_lock: Mutex::new(()),
            pending_flush: AtomicBool::new(false),
        }
    }

    pub async fn load(&self) -> anyhow::Result<()> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<HashMap<String, u64>>(&raw) {
            Ok(map) => *self.counts.write().await = map,
            Err(e) => {
                tracing::warn!(error = %e, "usage stats file corrupt, resetting");
                *self.counts.write().await = HashMap::new();
            }
        }
        Ok(())
    }

    pub async fn get(&self, tool_name: &str) -> u64 {
        self.counts.read().await.get(tool_name).copied().unwrap_or(0)
    }

    pub async fn snapshot(&self) -> HashMap<String, u64> {
        self.counts.read().await.clone()
    }

    pub async fn record(self: &Arc<Self>, tool_name: &str) -> u64 {
        let new_count = {
            let mut counts = self.counts.write().await;
            let entry = counts.entry(tool_name.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        self.schedule_flush();
        new_count
    }

    pub async fn set(self: &Arc<Self>, tool_name: &str, count: u64) {
        self.counts.write().await.insert(tool_name.to_string(), count);
        self.schedule_flush();
    }

    fn schedule_flush(self: &Arc<Self>) {
        if self.pending_flush.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            store.pending_flush.store(false, Ordering::SeqCst);
            if let Err(e) = store.flush_now().await {
                tracing::warn!(error = %e, "failed to flush usage stats");
            }
        });
    }

    async fn flush_now(&self) -> anyhow::Result<()> {
        let _guard = self.flush_lock.lock().await;
        let counts = self.counts.read().await;
        let json = serde_json::to_vec_pretty(&*counts)?;
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
            tracing::warn!(error = %e, "failed to flush usage stats on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_increments_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(UsageStore::new(dir.path().join("usage.json")));
        assert_eq!(store.record("launch-remotion-studio").await, 1);
        assert_eq!(store.record("launch-remotion-studio").await, 2);
    }

    #[tokio::test]
    async fn corrupt_file_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let store = UsageStore::new(path);
        store.load().await.unwrap();
        assert!(store.snapshot().await.is_empty());
    }

    /// Writing stats then reading them back through a fresh store instance
    /// yields the same map.
    #[tokio::test]
    async fn snapshot_round_trips_across_store_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");

        let writer = Arc::new(UsageStore::new(path.clone()));
        writer.set("launch-remotion-studio", 3).await;
        writer.set("list-available-tools", 7).await;
        writer.flush().await;

        let reader = UsageStore::new(path);
        reader.load().await.unwrap();
        assert_eq!(reader.snapshot().await, writer.snapshot().await);
    }
}
