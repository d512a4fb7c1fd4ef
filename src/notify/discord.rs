use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{post_json_with_retries, truncate_chars};
use crate::post::Post;
use crate::sync::Consumer;

/// Discord accepts at most 10 embeds per webhook message.
const EMBEDS_PER_MESSAGE: usize = 10;

#[derive(Clone)]
pub struct DiscordConsumer {
    name: String,
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordConsumer {
    pub fn new(webhook: String, client: Client) -> Self {
        Self {
            name: "discord".to_string(),
            webhook,
            client,
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }
}

#[async_trait::async_trait]
impl Consumer for DiscordConsumer {
    async fn push_batch(&self, posts: &[Post]) -> Result<()> {
        let messages: Vec<DiscordWebhookPayload> = posts
            .chunks(EMBEDS_PER_MESSAGE)
            .map(DiscordWebhookPayload::for_posts)
            .collect();

        let mut failed = 0usize;
        let mut last_err = None;
        for payload in &messages {
            if let Err(e) = post_json_with_retries(
                &self.client,
                &self.webhook,
                payload,
                self.timeout,
                self.max_retries,
            )
            .await
            {
                tracing::warn!(error = %e, consumer = %self.name, "discord message failed");
                failed += 1;
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) if failed == messages.len() => Err(anyhow!("Discord webhook: {e}")),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Serialize)]
struct DiscordAuthor {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Serialize)]
struct DiscordImage {
    url: String,
}

#[derive(Serialize)]
struct DiscordFooter {
    text: String,
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    description: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<DiscordAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<DiscordImage>,
    footer: DiscordFooter,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl DiscordWebhookPayload {
    fn for_posts(posts: &[Post]) -> Self {
        Self {
            content: None,
            embeds: posts.iter().map(DiscordEmbed::from_post).collect(),
        }
    }
}

impl DiscordEmbed {
    fn from_post(p: &Post) -> Self {
        let mut description = truncate_chars(&p.description, 300);
        if !p.tags.is_empty() {
            let tags = p.tags.iter().map(|t| format!("`{t}`")).collect::<Vec<_>>().join(" ");
            description = format!("{description}\n{tags}");
        }
        Self {
            title: truncate_chars(&p.title, 256),
            url: non_empty(&p.url),
            description,
            timestamp: p.published_datetime().to_rfc3339(),
            author: non_empty(&p.author).map(|name| DiscordAuthor {
                name: truncate_chars(&name, 256),
                url: non_empty(&p.author_url),
            }),
            image: p
                .picture_ref
                .as_ref()
                .and_then(|r| r.url())
                .map(|url| DiscordImage {
                    url: url.to_string(),
                }),
            footer: DiscordFooter {
                text: p.source.clone(),
            },
        }
    }
}
