// src/cursor/sled_store.rs
use std::path::Path;

use sled::{Db, Tree};

use super::CursorStore;
use crate::error::StoreError;

const TREE: &str = "sync";
const CURSOR_KEY: &[u8] = b"cursor";

/// Cursor kept in a sled tree as an 8-byte big-endian integer.
#[derive(Debug, Clone)]
pub struct SledCursorStore {
    tree: Tree,
}

impl SledCursorStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    /// Share an already opened database (the post archive lives in the same file).
    pub fn from_db(db: &Db) -> Result<Self, StoreError> {
        Ok(Self {
            tree: db.open_tree(TREE)?,
        })
    }
}

fn decode(raw: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StoreError::Corrupt { len: raw.len() })?;
    Ok(u64::from_be_bytes(bytes))
}

#[async_trait::async_trait]
impl CursorStore for SledCursorStore {
    async fn get_cursor(&self) -> Result<Option<u64>, StoreError> {
        match self.tree.get(CURSOR_KEY)? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn set_cursor(&self, ts: u64) -> Result<(), StoreError> {
        // Atomic read-max-write; a stale caller can never lower the watermark.
        let mut corrupt = None;
        self.tree.fetch_and_update(CURSOR_KEY, |old| {
            corrupt = None;
            let current = match old.map(decode).transpose() {
                Ok(v) => v,
                Err(e) => {
                    corrupt = Some(e);
                    return old.map(|o| o.to_vec());
                }
            };
            let next = current.map_or(ts, |c| c.max(ts));
            Some(next.to_be_bytes().to_vec())
        })?;
        if let Some(e) = corrupt {
            return Err(e);
        }
        self.tree.flush_async().await?;
        Ok(())
    }
}
