//! In-memory EPG cache with lock-free read snapshots
//!
//! Each store is an atomically swappable immutable value: a write builds a
//! complete replacement off to the side and swaps the reference once ready,
//! so a reader always sees either the old or the new value, never a mixture.
//! All writes are serialized through a single guard acquired with a bounded
//! timeout; failing to acquire it abandons the write cycle, there is no
//! queuing. The guard is RAII so it is released on every exit path.

use arc_swap::{ArcSwap, ArcSwapOption};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::debug;

use crate::errors::SyncError;
use crate::models::{ChannelCatalog, ScheduleDocument};

type ScheduleMap = HashMap<String, Arc<ScheduleDocument>>;

/// Proof of exclusive write access to the cache.
///
/// Store operations require one, which makes unserialized writes a compile
/// error rather than a race.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    _inner: MutexGuard<'a, ()>,
}

pub struct EpgCache {
    catalog: ArcSwapOption<ChannelCatalog>,
    schedules: ArcSwap<ScheduleMap>,
    write_gate: Mutex<()>,
    lock_timeout: Duration,
}

impl EpgCache {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            catalog: ArcSwapOption::empty(),
            schedules: ArcSwap::from_pointee(HashMap::new()),
            write_gate: Mutex::new(()),
            lock_timeout,
        }
    }

    /// Current published catalog, if any. Never blocks.
    pub fn catalog(&self) -> Option<Arc<ChannelCatalog>> {
        self.catalog.load_full()
    }

    /// Current published document for one channel. Never blocks.
    pub fn schedule(&self, channel_id: &str) -> Option<Arc<ScheduleDocument>> {
        self.schedules.load().get(channel_id).cloned()
    }

    /// Number of channels with a published schedule document.
    pub fn schedule_count(&self) -> usize {
        self.schedules.load().len()
    }

    /// Acquire the write guard, waiting at most the configured timeout.
    pub async fn acquire_write(&self, operation: &str) -> Result<WriteGuard<'_>, SyncError> {
        match timeout(self.lock_timeout, self.write_gate.lock()).await {
            Ok(inner) => Ok(WriteGuard { _inner: inner }),
            Err(_) => Err(SyncError::lock_timeout(
                operation,
                self.lock_timeout.as_millis() as u64,
            )),
        }
    }

    /// Publish a new catalog wholesale.
    pub fn store_catalog(&self, _guard: &WriteGuard<'_>, catalog: ChannelCatalog) {
        debug!(channels = catalog.len(), "Publishing channel catalog snapshot");
        self.catalog.store(Some(Arc::new(catalog)));
    }

    /// Publish a new schedule document for one channel, replacing the old
    /// one wholesale.
    pub fn store_schedule(&self, _guard: &WriteGuard<'_>, document: ScheduleDocument) {
        let channel_id = document.channel_id.clone();

        let current = self.schedules.load();
        let mut next: ScheduleMap = (**current).clone();
        next.insert(channel_id.clone(), Arc::new(document));
        self.schedules.store(Arc::new(next));

        debug!(channel_id = %channel_id, "Published schedule document snapshot");
    }

    /// Drop cached documents for channels no longer in the catalog.
    pub fn retain_channels(&self, _guard: &WriteGuard<'_>, keep: &[String]) {
        let current = self.schedules.load();
        if current.keys().all(|id| keep.contains(id)) {
            return;
        }

        let mut next: ScheduleMap = (**current).clone();
        next.retain(|id, _| keep.contains(id));
        self.schedules.store(Arc::new(next));
    }
}
