// src/error.rs
//! Typed errors for the sync engine and the cursor store.
//!
//! Collaborators (providers, consumers) speak `anyhow`; the engine wraps their
//! failures into the records below so callers can inspect who failed.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),
    #[error("corrupt cursor value ({len} bytes, expected 8)")]
    Corrupt { len: usize },
    #[error("cursor store unavailable: {0}")]
    Unavailable(String),
}

/// Hard failures of a single scan cycle. Provider and consumer problems never
/// show up here.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("failed to read cursor: {0}")]
    CursorRead(#[source] StoreError),
    #[error("failed to persist cursor {cursor}: {source}")]
    CursorWrite {
        cursor: u64,
        #[source]
        source: StoreError,
    },
    #[error("cycle cancelled before delivery finished")]
    Cancelled,
}

#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: anyhow::Error,
}

#[derive(Debug)]
pub struct ConsumerFailure {
    pub consumer: String,
    pub error: anyhow::Error,
}

impl fmt::Display for ConsumerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.consumer, self.error)
    }
}

/// Every consumer failure of one cycle, joined into a single error value.
#[derive(Debug, thiserror::Error)]
#[error("{} consumer(s) failed: {}", .0.len(), join_failures(.0))]
pub struct DeliveryErrors(pub Vec<ConsumerFailure>);

impl DeliveryErrors {
    pub fn consumers(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|f| f.consumer.as_str())
    }
}

fn join_failures(failures: &[ConsumerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_errors_mention_every_consumer() {
        let err = DeliveryErrors(vec![
            ConsumerFailure {
                consumer: "lark".into(),
                error: anyhow::anyhow!("timeout"),
            },
            ConsumerFailure {
                consumer: "slack".into(),
                error: anyhow::anyhow!("403"),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 consumer(s) failed"));
        assert!(msg.contains("lark: timeout"));
        assert!(msg.contains("slack: 403"));
        assert_eq!(err.consumers().collect::<Vec<_>>(), vec!["lark", "slack"]);
    }
}
