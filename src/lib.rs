// src/lib.rs
//! Incremental sync and fan-out: poll several content sources, merge their
//! posts into one deduplicated newest-first stream, and hand the unseen part
//! to notification consumers, remembering progress in a persisted cursor.

pub mod app;
pub mod archive;
pub mod config;
pub mod cursor;
pub mod error;
pub mod feed;
pub mod notify;
pub mod post;
pub mod providers;
pub mod sync;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::cursor::{CursorStore, MemoryCursorStore, SledCursorStore};
pub use crate::error::{CycleError, DeliveryErrors, StoreError};
pub use crate::post::{PictureRef, Post, PostKey};
pub use crate::sync::{Consumer, CycleReport, Provider, SyncEngine};
