//! Synced key-value storage area
//!
//! The store offers atomic per-key reads and writes and multi-key reads in a
//! single call, but no cross-call transactions. Every write is broadcast to
//! subscribers as a [`StorageChange`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use rr_core::storage::{snapshot_items, StorageItems};
use rr_core::types::StorageSnapshot;
use rr_core::StorageError;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Old and new value of one key.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Keys changed by a single write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageChange {
    pub changes: Vec<(String, ValueChange)>,
}

impl StorageChange {
    /// Whether any of `keys` changed.
    pub fn touches(&self, keys: &[&str]) -> bool {
        self.changes.iter().any(|(key, _)| keys.contains(&key.as_str()))
    }
}

#[async_trait]
pub trait StorageArea: Send + Sync {
    /// Read `keys` in one call. Absent keys are omitted from the result.
    async fn get(&self, keys: &[&str]) -> Result<StorageItems, StorageError>;

    /// Write all `items` in one call.
    async fn set(&self, items: StorageItems) -> Result<(), StorageError>;

    /// Subscribe to change notifications for subsequent writes.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// In-process storage area.
pub struct MemoryStorage {
    items: Mutex<StorageItems>,
    changes: broadcast::Sender<StorageChange>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_items(StorageItems::new())
    }

    pub fn with_items(items: StorageItems) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            items: Mutex::new(items),
            changes,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Storage holding every key of `snapshot`.
    pub fn from_snapshot(snapshot: &StorageSnapshot) -> Result<Self, StorageError> {
        Ok(Self::with_items(snapshot_items(snapshot)?))
    }

    /// Make subsequent reads fail (simulates a storage outage).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of everything stored.
    pub fn dump(&self) -> StorageItems {
        self.lock().map(|items| items.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StorageItems>, StorageError> {
        self.items
            .lock()
            .map_err(|_| StorageError::Read("storage lock poisoned".to_string()))
    }
}

#[async_trait]
impl StorageArea for MemoryStorage {
    async fn get(&self, keys: &[&str]) -> Result<StorageItems, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Read("storage unavailable".to_string()));
        }
        let items = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|key| items.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    async fn set(&self, new_items: StorageItems) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write("storage unavailable".to_string()));
        }

        let mut change = StorageChange::default();
        {
            let mut items = self
                .items
                .lock()
                .map_err(|_| StorageError::Write("storage lock poisoned".to_string()))?;
            for (key, value) in new_items {
                let old_value = items.insert(key.clone(), value.clone());
                if old_value.as_ref() != Some(&value) {
                    change.changes.push((
                        key,
                        ValueChange {
                            old_value,
                            new_value: Some(value),
                        },
                    ));
                }
            }
        }

        if !change.changes.is_empty() {
            // No subscribers is not an error
            let _ = self.changes.send(change);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
