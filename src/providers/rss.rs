// src/providers/rss.rs
use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use super::{normalize_text, DESCRIPTION_MAX_CHARS};
use crate::post::{PictureRef, Post};
use crate::sync::Provider;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    author: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "category", default)]
    category: Vec<Text>,
    enclosure: Option<Enclosure>,
}

// Elements that may carry attributes (`<guid isPermaLink="false">`).
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@type", default)]
    mime: String,
}

fn parse_rfc2822_to_unix(ts: &str) -> u64 {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
        .unwrap_or(0)
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

/// Posts from one RSS 2.0 feed.
pub struct RssProvider {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        url: String,
        client: reqwest::Client,
        max_retries: u8,
    },
}

impl RssProvider {
    /// Serve a fixed document (tests, dry runs).
    pub fn from_fixture(name: impl Into<String>, xml: &str) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    /// Fetch `url` on every collect with the given client.
    pub fn from_url(
        name: impl Into<String>,
        url: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            mode: Mode::Http {
                url: url.into(),
                client,
                max_retries: 3,
            },
        }
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        if let Mode::Http { max_retries, .. } = &mut self.mode {
            *max_retries = retries.max(1);
        }
        self
    }

    fn parse_posts(&self, xml: &str) -> Result<Vec<Post>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean)
            .with_context(|| format!("parsing {} rss xml", self.name))?;

        let feed_title = rss.channel.title.as_deref().map(str::trim).unwrap_or_default();
        let feed_link = rss.channel.link.as_deref().map(str::trim).unwrap_or_default();

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let link = it.link.as_deref().map(str::trim).unwrap_or_default().to_string();
            let id = it
                .guid
                .as_ref()
                .map(|g| g.value.trim())
                .filter(|g| !g.is_empty())
                .unwrap_or(link.as_str())
                .to_string();
            if id.is_empty() {
                tracing::debug!(provider = %self.name, "rss item without guid or link skipped");
                continue;
            }
            if !seen.insert(id.clone()) {
                continue;
            }

            let author = it
                .author
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .unwrap_or(feed_title)
                .to_string();
            let picture_ref = it
                .enclosure
                .filter(|e| e.mime.starts_with("image/"))
                .map(|e| PictureRef::Url(e.url));

            out.push(Post {
                source: self.name.clone(),
                id,
                title: normalize_text(it.title.as_deref().unwrap_or_default(), 300),
                description: normalize_text(
                    it.description.as_deref().unwrap_or_default(),
                    DESCRIPTION_MAX_CHARS,
                ),
                tags: it
                    .category
                    .into_iter()
                    .map(|c| c.value.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
                published_at: it
                    .pub_date
                    .as_deref()
                    .map(parse_rfc2822_to_unix)
                    .unwrap_or(0),
                author,
                author_url: feed_link.to_string(),
                url: link,
                picture_ref,
                extra: serde_json::Value::Null,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("provider_parse_ms").record(ms);
        counter!("provider_items_total", "provider" => self.name.clone())
            .increment(out.len() as u64);
        Ok(out)
    }

    async fn fetch(url: &str, client: &reqwest::Client, max_retries: u8) -> Result<String> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = client
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            match res {
                Ok(rsp) => return rsp.text().await.context("rss http .text()"),
                Err(e) if attempt < max_retries => {
                    tracing::debug!(error = %e, attempt, url, "rss fetch failed, retrying");
                    tokio::time::sleep(crate::notify::backoff_delay(attempt)).await;
                }
                Err(e) => {
                    return Err(anyhow!("rss fetch {url} failed after {attempt} attempts: {e}"))
                }
            }
        }
    }
}

#[async_trait]
impl Provider for RssProvider {
    async fn collect(&self) -> Result<Vec<Post>> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_posts(s),
            Mode::Http {
                url,
                client,
                max_retries,
            } => {
                let body = Self::fetch(url, client, *max_retries).await?;
                self.parse_posts(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc2822_dates_parse_to_utc_seconds() {
        assert_eq!(
            parse_rfc2822_to_unix("Tue, 14 Nov 2023 22:13:20 +0000"),
            1_700_000_000
        );
        assert_eq!(
            parse_rfc2822_to_unix("Wed, 15 Nov 2023 00:13:20 +0200"),
            1_700_000_000
        );
        assert_eq!(parse_rfc2822_to_unix("yesterday"), 0);
    }

    #[tokio::test]
    async fn malformed_document_is_an_error() {
        let p = RssProvider::from_fixture("broken", "<rss><channel><item>");
        assert!(p.collect().await.is_err());
    }
}
