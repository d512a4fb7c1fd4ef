// src/archive.rs
//! Delivered posts kept in sled so the feed server can republish them.

use std::convert::Infallible;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};

use crate::post::{Post, PostKey};
use crate::sync::Consumer;

const TREE: &str = "posts";
/// Secondary index: `archived_at ++ published_at ++ identity` -> primary key.
const TIME_TREE: &str = "posts_by_time";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedPost {
    pub post: Post,
    pub archived_at: i64, // unix seconds
}

/// Upsert-by-identity store of posts. One entry per `(source, id)`.
#[derive(Debug, Clone)]
pub struct PostArchive {
    posts: Tree,
    by_time: Tree,
}

fn storage_key(key: &PostKey) -> Vec<u8> {
    let mut k = Vec::with_capacity(key.source.len() + key.id.len() + 1);
    k.extend_from_slice(key.source.as_bytes());
    k.push(0);
    k.extend_from_slice(key.id.as_bytes());
    k
}

/// Big-endian times first, so byte order is archive order then publication order.
fn time_key(archived_at: i64, post: &Post) -> Vec<u8> {
    let primary = storage_key(&post.key());
    let mut k = Vec::with_capacity(16 + primary.len());
    k.extend_from_slice(&(archived_at.max(0) as u64).to_be_bytes());
    k.extend_from_slice(&post.published_at.to_be_bytes());
    k.extend_from_slice(&primary);
    k
}

impl PostArchive {
    pub fn from_db(db: &Db) -> Result<Self> {
        let posts = db.open_tree(TREE).context("open posts tree")?;
        let by_time = db.open_tree(TIME_TREE).context("open posts index")?;
        let archive = Self { posts, by_time };
        if archive.by_time.is_empty() && !archive.posts.is_empty() {
            archive.reindex()?;
        }
        Ok(archive)
    }

    /// Rebuild the time index from the primary tree.
    fn reindex(&self) -> Result<()> {
        let mut batch = sled::Batch::default();
        let mut n = 0usize;
        for item in self.posts.iter() {
            let (key, raw) = item.context("scan posts")?;
            match serde_json::from_slice::<ArchivedPost>(&raw) {
                Ok(p) => {
                    batch.insert(time_key(p.archived_at, &p.post), key);
                    n += 1;
                }
                Err(e) => tracing::warn!(error = %e, "skipping unreadable archived post"),
            }
        }
        self.by_time.apply_batch(batch).context("write posts index")?;
        tracing::info!(posts = n, "rebuilt archive time index");
        Ok(())
    }

    /// Insert or replace; the archive time is refreshed on every write.
    pub async fn upsert(&self, posts: &[Post], now: i64) -> Result<()> {
        let mut entries = Vec::with_capacity(posts.len());
        for p in posts {
            let entry = ArchivedPost {
                post: p.clone(),
                archived_at: now,
            };
            let value = serde_json::to_vec(&entry).context("serialize archived post")?;
            entries.push((storage_key(&p.key()), time_key(now, p), value));
        }

        (&self.posts, &self.by_time)
            .transaction(|(tx_posts, tx_index)| {
                for (key, index_key, value) in &entries {
                    if let Some(old) = tx_posts.insert(key.as_slice(), value.as_slice())? {
                        // unreadable old entries leave a stale index key; `latest` skips it
                        if let Ok(old) = serde_json::from_slice::<ArchivedPost>(&old) {
                            tx_index.remove(time_key(old.archived_at, &old.post))?;
                        }
                    }
                    tx_index.insert(index_key.as_slice(), key.as_slice())?;
                }
                Ok::<_, ConflictableTransactionError<Infallible>>(())
            })
            .map_err(|e: TransactionError<Infallible>| anyhow!("write posts: {e}"))?;
        self.posts.flush_async().await.context("flush posts")?;
        Ok(())
    }

    pub fn get(&self, key: &PostKey) -> Result<Option<ArchivedPost>> {
        match self.posts.get(storage_key(key)).context("read post")? {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw).context("deserialize archived post")?,
            )),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    /// Newest `limit` posts by archive time (then publication time),
    /// optionally for one source only. Walks the time index backwards, so
    /// only the returned entries are read and decoded.
    pub fn latest(&self, source: Option<&str>, limit: usize) -> Result<Vec<ArchivedPost>> {
        let prefix = source.map(|s| {
            let mut p = s.as_bytes().to_vec();
            p.push(0);
            p
        });

        let mut out = Vec::new();
        for item in self.by_time.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (index_key, key) = item.context("scan posts index")?;
            if let Some(prefix) = &prefix {
                if !key.starts_with(prefix) {
                    continue;
                }
            }
            let Some(raw) = self.posts.get(&key).context("read post")? else {
                continue;
            };
            match serde_json::from_slice::<ArchivedPost>(&raw) {
                Ok(p) if time_key(p.archived_at, &p.post).as_slice() == &*index_key => {
                    out.push(p)
                }
                Ok(_) => {} // stale index entry
                Err(e) => tracing::warn!(error = %e, "skipping unreadable archived post"),
            }
        }
        Ok(out)
    }
}

/// Consumer that records every delivered batch in the archive.
pub struct ArchiveConsumer {
    archive: PostArchive,
}

impl ArchiveConsumer {
    pub fn new(archive: PostArchive) -> Self {
        Self { archive }
    }
}

#[async_trait::async_trait]
impl Consumer for ArchiveConsumer {
    async fn push_batch(&self, posts: &[Post]) -> Result<()> {
        self.archive
            .upsert(posts, chrono::Utc::now().timestamp())
            .await
    }

    fn name(&self) -> &str {
        "archive"
    }
}
