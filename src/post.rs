// src/post.rs
//! Normalized content item shared by every provider and consumer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a post. Two posts with the same key are the same entity,
/// whatever their other fields say.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostKey {
    pub source: String,
    pub id: String,
}

impl fmt::Display for PostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.id)
    }
}

/// Where a post's picture lives. Consumers resolve it lazily, only when
/// they actually render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PictureRef {
    Url(String),
    Inline(Vec<u8>),
}

impl PictureRef {
    pub fn url(&self) -> Option<&str> {
        match self {
            PictureRef::Url(u) => Some(u.as_str()),
            PictureRef::Inline(_) => None,
        }
    }

    /// Fetch the picture bytes using the caller's HTTP client.
    pub async fn resolve(&self, client: &reqwest::Client) -> Result<Vec<u8>> {
        match self {
            PictureRef::Inline(bytes) => Ok(bytes.clone()),
            PictureRef::Url(url) => {
                let bytes = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("fetch picture {url}"))?
                    .error_for_status()
                    .with_context(|| format!("picture {url} non-2xx"))?
                    .bytes()
                    .await
                    .context("read picture body")?;
                Ok(bytes.to_vec())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub source: String, // stable provider name
    pub id: String,     // unique within source
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub published_at: u64, // unix seconds
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_url: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub picture_ref: Option<PictureRef>,
    /// Source-specific payload, only meaningful to consumers that know the source.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl Post {
    /// Minimal post; the remaining fields start empty.
    pub fn new(
        source: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        published_at: u64,
    ) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            published_at,
            author: String::new(),
            author_url: String::new(),
            url: String::new(),
            picture_ref: None,
            extra: serde_json::Value::Null,
        }
    }

    pub fn key(&self) -> PostKey {
        PostKey {
            source: self.source.clone(),
            id: self.id.clone(),
        }
    }

    /// Publication time as a UTC datetime (epoch if out of range).
    pub fn published_datetime(&self) -> chrono::DateTime<chrono::Utc> {
        i64::try_from(self.published_at)
            .ok()
            .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
            .unwrap_or_default()
    }
}
