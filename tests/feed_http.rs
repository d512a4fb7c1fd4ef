// tests/feed_http.rs
//
// Feed server routes exercised through tower::ServiceExt::oneshot, no sockets.

use axum::{
    body::{self, Body},
    Router,
};
use http::{header, Request, StatusCode};
use tower::ServiceExt as _;

use feed_relay::archive::PostArchive;
use feed_relay::feed::{create_router, FeedState};
use feed_relay::Post;

const BODY_LIMIT: usize = 1024 * 1024;

/// Archive with two sources; the temp dir must outlive the router.
async fn test_router() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = sled::open(dir.path().join("relay.db")).expect("open sled");
    let archive = PostArchive::from_db(&db).expect("archive");

    let mut a = Post::new("blog", "1", "Blog post one", 1_700_000_000);
    a.url = "https://blog.test/1".into();
    let b = Post::new("blog", "2", "Blog post two", 1_700_000_100);
    let c = Post::new("news", "n1", "Newsflash", 1_700_000_050);
    archive.upsert(&[a, b], 1_700_000_200).await.unwrap();
    archive.upsert(&[c], 1_700_000_300).await.unwrap();

    let mut state = FeedState::new(archive);
    state.title = "relay".into();
    state.link = "https://relay.test/".into();
    (dir, create_router(state, None))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let ctype = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    (status, ctype, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

#[tokio::test]
async fn health_is_ok() {
    let (_dir, app) = test_router().await;
    let (status, _, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn default_feed_is_rss_with_every_source() {
    let (_dir, app) = test_router().await;
    let (status, ctype, body) = get(app, "/rss").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ctype.as_deref(), Some("application/rss+xml"));
    assert!(body.contains("<rss version=\"2.0\">"), "body: {body}");
    assert!(body.contains("<guid>news/n1</guid>"));
    assert!(body.contains("<guid>blog/1</guid>"));
    assert!(body.contains("<guid>blog/2</guid>"));
    // most recently archived first
    let news = body.find("news/n1").unwrap();
    let blog = body.find("blog/2").unwrap();
    assert!(news < blog);
}

#[tokio::test]
async fn source_route_filters_posts() {
    let (_dir, app) = test_router().await;
    let (status, _, body) = get(app, "/rss/blog").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("blog/1"));
    assert!(!body.contains("news/n1"));
}

#[tokio::test]
async fn atom_and_json_are_selectable() {
    let (_dir, app) = test_router().await;

    let (status, ctype, body) = get(app.clone(), "/rss?type=atom").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ctype.as_deref(), Some("application/atom+xml"));
    assert!(body.contains("<feed xmlns=\"http://www.w3.org/2005/Atom\">"));

    let (status, ctype, body) = get(app, "/rss/blog?type=json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ctype.as_deref(), Some("application/json"));
    let v: serde_json::Value = serde_json::from_str(&body).expect("json feed");
    assert_eq!(v["title"], "relay");
    let ids: Vec<&str> = v["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["blog/2", "blog/1"]);
}

#[tokio::test]
async fn unknown_type_is_a_bad_request() {
    let (_dir, app) = test_router().await;
    let (status, _, _) = get(app, "/rss?type=yaml").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn max_items_limits_the_feed() {
    let (_dir, app) = {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("relay.db")).unwrap();
        let archive = PostArchive::from_db(&db).unwrap();
        let posts: Vec<Post> = (0..25)
            .map(|i| Post::new("bulk", format!("{i}"), format!("item {i}"), 1_000 + i))
            .collect();
        archive.upsert(&posts, 5_000).await.unwrap();
        (dir, create_router(FeedState::new(archive), None))
    };

    let (_, _, body) = get(app, "/rss?type=json").await;
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    let items = v["items"].as_array().unwrap();
    assert_eq!(items.len(), 10);
    assert_eq!(items[0]["id"], "bulk/24");
}
