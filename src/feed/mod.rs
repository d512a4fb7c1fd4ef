// src/feed/mod.rs
//! HTTP surface republishing archived posts as feeds.
//!
//! Routes:
//!   GET /health
//!   GET /rss             newest posts of every source
//!   GET /rss/{source}    newest posts of one source
//!   `?type=rss|atom|json` selects the format (default rss).

pub mod render;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::CorsLayer;

use crate::archive::PostArchive;
use render::{FeedKind, FeedMeta};

pub const DEFAULT_MAX_ITEMS: usize = 10;

#[derive(Clone)]
pub struct FeedState {
    pub archive: PostArchive,
    pub max_items: usize,
    pub title: String,
    pub link: String,
}

impl FeedState {
    pub fn new(archive: PostArchive) -> Self {
        Self {
            archive,
            max_items: DEFAULT_MAX_ITEMS,
            title: "feed-relay".to_string(),
            link: String::new(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct FeedQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

pub fn create_router(state: FeedState, metrics: Option<PrometheusHandle>) -> Router {
    let mut router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/rss", get(all_sources))
        .route("/rss/{source}", get(one_source))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    if let Some(handle) = metrics {
        router = router.route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        );
    }
    router
}

async fn all_sources(State(state): State<FeedState>, Query(q): Query<FeedQuery>) -> Response {
    feed_response(&state, None, q)
}

async fn one_source(
    State(state): State<FeedState>,
    Path(source): Path<String>,
    Query(q): Query<FeedQuery>,
) -> Response {
    feed_response(&state, Some(&source), q)
}

fn feed_response(state: &FeedState, source: Option<&str>, q: FeedQuery) -> Response {
    let Some(kind) = FeedKind::parse(q.kind.as_deref()) else {
        return (StatusCode::BAD_REQUEST, "type must be rss, atom or json").into_response();
    };

    let posts = match state.archive.latest(source, state.max_items) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = ?e, "failed to query posts");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let meta = FeedMeta {
        title: state.title.clone(),
        link: state.link.clone(),
        description: format!("{} feeds {}", state.title, source.unwrap_or_default())
            .trim_end()
            .to_string(),
    };
    match render::render(kind, &meta, &posts) {
        Ok(body) => ([(header::CONTENT_TYPE, kind.content_type())], body).into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "failed to render feed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
