use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::{post_json_with_retries, truncate_chars};
use crate::post::Post;
use crate::sync::Consumer;

pub struct SlackConsumer {
    webhook_url: String,
    client: Client,
    max_retries: u8,
}

impl SlackConsumer {
    pub fn new(url: String, client: Client) -> Self {
        Self {
            webhook_url: url,
            client,
            max_retries: 3,
        }
    }

    pub fn with_retries(mut self, n: u8) -> Self {
        self.max_retries = n;
        self
    }
}

/// One mrkdwn message listing the whole batch.
fn render_text(posts: &[Post]) -> String {
    let mut text = format!("*{} new post(s)*", posts.len());
    for p in posts {
        let title = truncate_chars(&p.title, 150);
        let head = if p.url.is_empty() {
            format!("*{title}*")
        } else {
            format!("<{}|{}>", p.url, title)
        };
        let by = if p.author.is_empty() {
            String::new()
        } else {
            format!(" by {}", p.author)
        };
        text.push_str(&format!(
            "\n• {head}{by} ({}, {})",
            p.source,
            p.published_datetime().format("%Y-%m-%d %H:%M UTC")
        ));
    }
    text
}

#[async_trait::async_trait]
impl Consumer for SlackConsumer {
    async fn push_batch(&self, posts: &[Post]) -> Result<()> {
        let body = serde_json::json!({ "text": render_text(posts) });
        post_json_with_retries(
            &self.client,
            &self.webhook_url,
            &body,
            Duration::from_secs(10),
            self.max_retries,
        )
        .await
        .context("slack post")?;
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}
