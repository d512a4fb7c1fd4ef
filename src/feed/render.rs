// src/feed/render.rs
//! RSS 2.0, Atom and JSON Feed documents built from archived posts.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::archive::ArchivedPost;

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
    Json,
}

impl FeedKind {
    /// `None` (no `type` query) means RSS; anything unknown is rejected.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim).unwrap_or("rss") {
            "" | "rss" => Some(FeedKind::Rss),
            "atom" => Some(FeedKind::Atom),
            "json" => Some(FeedKind::Json),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            FeedKind::Rss => "application/rss+xml",
            FeedKind::Atom => "application/atom+xml",
            FeedKind::Json => "application/json",
        }
    }
}

/// Channel-level metadata.
#[derive(Debug, Clone)]
pub struct FeedMeta {
    pub title: String,
    pub link: String,
    pub description: String,
}

pub fn render(kind: FeedKind, meta: &FeedMeta, posts: &[ArchivedPost]) -> Result<String> {
    match kind {
        FeedKind::Rss => render_rss(meta, posts),
        FeedKind::Atom => render_atom(meta, posts),
        FeedKind::Json => render_json(meta, posts),
    }
}

fn is_empty(s: &&str) -> bool {
    s.is_empty()
}

#[derive(Serialize)]
#[serde(rename = "rss")]
struct RssDoc<'a> {
    #[serde(rename = "@version")]
    version: &'static str,
    channel: RssChannel<'a>,
}

#[derive(Serialize)]
struct RssChannel<'a> {
    title: &'a str,
    link: &'a str,
    description: &'a str,
    #[serde(rename = "lastBuildDate")]
    last_build_date: String,
    #[serde(rename = "item")]
    items: Vec<RssItem<'a>>,
}

#[derive(Serialize)]
struct RssItem<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    link: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "is_empty")]
    author: &'a str,
    #[serde(rename = "category")]
    categories: Vec<&'a str>,
    guid: String,
    #[serde(rename = "pubDate")]
    pub_date: String,
}

fn render_rss(meta: &FeedMeta, posts: &[ArchivedPost]) -> Result<String> {
    let doc = RssDoc {
        version: "2.0",
        channel: RssChannel {
            title: &meta.title,
            link: &meta.link,
            description: &meta.description,
            last_build_date: chrono::Utc::now().to_rfc2822(),
            items: posts
                .iter()
                .map(|a| RssItem {
                    title: &a.post.title,
                    link: &a.post.url,
                    description: &a.post.description,
                    author: &a.post.author,
                    categories: a.post.tags.iter().map(String::as_str).collect(),
                    guid: a.post.key().to_string(),
                    pub_date: a.post.published_datetime().to_rfc2822(),
                })
                .collect(),
        },
    };
    let body = quick_xml::se::to_string(&doc).context("serialize rss")?;
    Ok(format!("{XML_DECL}{body}"))
}

#[derive(Serialize)]
struct AtomLink<'a> {
    #[serde(rename = "@href")]
    href: &'a str,
}

#[derive(Serialize)]
struct AtomAuthor<'a> {
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename = "feed")]
struct AtomFeed<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    id: &'a str,
    title: &'a str,
    subtitle: &'a str,
    updated: String,
    link: AtomLink<'a>,
    #[serde(rename = "entry")]
    entries: Vec<AtomEntry<'a>>,
}

#[derive(Serialize)]
struct AtomEntry<'a> {
    id: String,
    title: &'a str,
    updated: String,
    published: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    link: Option<AtomLink<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<AtomAuthor<'a>>,
    summary: &'a str,
}

fn rfc3339(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

fn render_atom(meta: &FeedMeta, posts: &[ArchivedPost]) -> Result<String> {
    let updated = posts
        .iter()
        .map(|a| a.archived_at)
        .max()
        .map(rfc3339)
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    let doc = AtomFeed {
        xmlns: "http://www.w3.org/2005/Atom",
        id: &meta.link,
        title: &meta.title,
        subtitle: &meta.description,
        updated,
        link: AtomLink { href: &meta.link },
        entries: posts
            .iter()
            .map(|a| AtomEntry {
                id: a.post.key().to_string(),
                title: &a.post.title,
                updated: rfc3339(a.archived_at),
                published: a.post.published_datetime().to_rfc3339(),
                link: (!a.post.url.is_empty()).then(|| AtomLink { href: &a.post.url }),
                author: (!a.post.author.is_empty()).then(|| AtomAuthor {
                    name: &a.post.author,
                }),
                summary: &a.post.description,
            })
            .collect(),
    };
    let body = quick_xml::se::to_string(&doc).context("serialize atom")?;
    Ok(format!("{XML_DECL}{body}"))
}

fn render_json(meta: &FeedMeta, posts: &[ArchivedPost]) -> Result<String> {
    let items: Vec<serde_json::Value> = posts
        .iter()
        .map(|a| {
            let p = &a.post;
            serde_json::json!({
                "id": p.key().to_string(),
                "url": p.url,
                "title": p.title,
                "content_text": p.description,
                "date_published": p.published_datetime().to_rfc3339(),
                "date_modified": rfc3339(a.archived_at),
                "authors": [{ "name": p.author, "url": p.author_url }],
                "tags": p.tags,
                "image": p.picture_ref.as_ref().and_then(|r| r.url()),
                "_source": p.source,
            })
        })
        .collect();
    let doc = serde_json::json!({
        "version": "https://jsonfeed.org/version/1.1",
        "title": meta.title,
        "home_page_url": meta.link,
        "description": meta.description,
        "items": items,
    });
    serde_json::to_string(&doc).context("serialize json feed")
}
