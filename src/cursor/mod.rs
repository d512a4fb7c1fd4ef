// src/cursor/mod.rs
//! Persisted high-water mark: the newest `published_at` ever handed to consumers.

pub mod sled_store;

pub use sled_store::SledCursorStore;

use crate::error::StoreError;
use std::sync::Mutex;

#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    /// `None` means no cycle has ever delivered anything.
    async fn get_cursor(&self) -> Result<Option<u64>, StoreError>;
    async fn set_cursor(&self, ts: u64) -> Result<(), StoreError>;
}

/// Volatile store for dry runs and tests. Same monotonic contract as the
/// sled store.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    value: Mutex<Option<u64>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ts: u64) -> Self {
        Self {
            value: Mutex::new(Some(ts)),
        }
    }
}

#[async_trait::async_trait]
impl CursorStore for MemoryCursorStore {
    async fn get_cursor(&self) -> Result<Option<u64>, StoreError> {
        let v = self
            .value
            .lock()
            .map_err(|_| StoreError::Unavailable("cursor mutex poisoned".into()))?;
        Ok(*v)
    }

    async fn set_cursor(&self, ts: u64) -> Result<(), StoreError> {
        let mut v = self
            .value
            .lock()
            .map_err(|_| StoreError::Unavailable("cursor mutex poisoned".into()))?;
        *v = Some(v.map_or(ts, |old| old.max(ts)));
        Ok(())
    }
}
