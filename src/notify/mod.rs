// src/notify/mod.rs
//! Consumers that deliver a batch of posts to an external channel.

pub mod discord;
pub mod email;
pub mod lark;
pub mod slack;

pub use discord::DiscordConsumer;
pub use email::EmailConsumer;
pub use lark::{
    ChatItem, ImageUploader, LarkApp, LarkChatConsumer, LarkImageUploader, LarkWebhookConsumer,
    WebhookList,
};
pub use slack::SlackConsumer;

use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;

use crate::post::Post;
use crate::sync::Consumer;

/// Delay before retry number `attempt` (1-based): 500ms doubling per attempt,
/// capped at 32s.
pub(crate) fn backoff_delay(attempt: u8) -> Duration {
    Duration::from_millis(500u64 << attempt.saturating_sub(1).min(6))
}

/// POST `payload` as JSON, retrying transport errors and non-2xx responses
/// with exponential backoff (see [`backoff_delay`]).
pub(crate) async fn post_json_with_retries<T: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    payload: &T,
    timeout: Duration,
    max_retries: u8,
) -> Result<reqwest::Response> {
    let max_retries = max_retries.max(1);
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        let res = client.post(url).timeout(timeout).json(payload).send().await;

        let err = match res {
            Ok(rsp) => match rsp.error_for_status_ref() {
                Ok(_) => return Ok(rsp),
                Err(e) => anyhow!("HTTP error: {e}"),
            },
            Err(e) => anyhow!("request failed: {e}"),
        };
        if attempt >= max_retries {
            return Err(err);
        }
        tokio::time::sleep(backoff_delay(attempt)).await;
    }
}

/// Cut `s` to at most `max` characters, marking the cut with an ellipsis.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Writes the batch to the log only. Useful for dry runs.
#[derive(Debug, Default)]
pub struct LogConsumer;

#[async_trait::async_trait]
impl Consumer for LogConsumer {
    async fn push_batch(&self, posts: &[Post]) -> Result<()> {
        for p in posts {
            tracing::info!(
                target: "relay::log",
                source = %p.source,
                id = %p.id,
                published_at = p.published_at,
                url = %p.url,
                "{}",
                p.title
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefgh", 4), "abc…");
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_secs(1));
        assert_eq!(backoff_delay(7), Duration::from_secs(32));
        assert_eq!(backoff_delay(8), Duration::from_secs(32));
        // large retry counts must not overflow the shift
        assert_eq!(backoff_delay(u8::MAX), Duration::from_secs(32));
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn log_consumer_accepts_any_batch() {
        let posts = vec![Post::new("s", "1", "hello", 10)];
        assert!(LogConsumer.push_batch(&posts).await.is_ok());
        assert!(LogConsumer.push_batch(&[]).await.is_ok());
    }
}
