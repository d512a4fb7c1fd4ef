// tests/lark_chat.rs
//
// LarkChatConsumer against a local stand-in for the Lark open API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::{json, Value};

use feed_relay::notify::{LarkApp, LarkChatConsumer};
use feed_relay::{Consumer, Post};

#[derive(Default)]
struct FakeLark {
    token_calls: AtomicUsize,
    /// Chat ids whose send is rejected.
    reject: Vec<String>,
    list_fails: bool,
    sent: Mutex<Vec<Value>>,
}

async fn token(State(s): State<Arc<FakeLark>>) -> Json<Value> {
    s.token_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "code": 0, "msg": "ok", "tenant_access_token": "t-1", "expire": 7200 }))
}

async fn chats(
    State(s): State<Arc<FakeLark>>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Value> {
    if s.list_fails {
        return Json(json!({ "code": 99991663, "msg": "invalid token" }));
    }
    let data = match q.get("page_token").map(String::as_str) {
        None => json!({
            "items": [{ "chat_id": "oc_1", "name": "one" }, { "chat_id": "oc_2", "name": "two" }],
            "has_more": true,
            "page_token": "p2",
        }),
        Some("p2") => json!({
            "items": [{ "chat_id": "oc_3", "name": "three" }],
            "has_more": false,
            "page_token": "",
        }),
        Some(_) => json!({ "items": [], "has_more": false }),
    };
    Json(json!({ "code": 0, "msg": "success", "data": data }))
}

async fn messages(
    State(s): State<Arc<FakeLark>>,
    Query(q): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    assert_eq!(q.get("receive_id_type").map(String::as_str), Some("chat_id"));
    let chat = body["receive_id"].as_str().unwrap_or_default().to_string();
    if s.reject.contains(&chat) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": 230002, "msg": "bot is not in the chat" })),
        );
    }
    s.sent.lock().push(body);
    (StatusCode::OK, Json(json!({ "code": 0, "msg": "success" })))
}

/// Serves the fake API on an ephemeral port and returns its base URL.
async fn serve(state: Arc<FakeLark>) -> String {
    let app = Router::new()
        .route("/open-apis/auth/v3/tenant_access_token/internal", post(token))
        .route("/open-apis/im/v1/chats", get(chats))
        .route("/open-apis/im/v1/messages", post(messages))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake lark server");
    });
    format!("http://{addr}")
}

fn consumer(base_url: String) -> LarkChatConsumer {
    let app = LarkApp::new(reqwest::Client::new(), "cli_x".into(), "secret".into())
        .with_base_url(base_url);
    LarkChatConsumer::new(Arc::new(app)).with_template("tpl")
}

fn posts() -> Vec<Post> {
    vec![
        Post::new("rss", "2", "Second", 1_700_000_100),
        Post::new("rss", "1", "First", 1_700_000_000),
    ]
}

#[tokio::test]
async fn card_goes_to_every_chat_across_pages() {
    let fake = Arc::new(FakeLark {
        reject: vec!["oc_2".into()],
        ..FakeLark::default()
    });
    let lark = consumer(serve(fake.clone()).await);

    let chats = lark.list_chats().await.unwrap();
    let ids: Vec<_> = chats.iter().map(|c| c.chat_id.as_str()).collect();
    assert_eq!(ids, vec!["oc_1", "oc_2", "oc_3"]);

    // one rejected chat does not fail the batch
    lark.push_batch(&posts()).await.unwrap();

    let sent = fake.sent.lock().clone();
    let receivers: Vec<_> = sent.iter().filter_map(|b| b["receive_id"].as_str()).collect();
    assert_eq!(receivers, vec!["oc_1", "oc_3"]);
    let card: Value = serde_json::from_str(sent[0]["content"].as_str().unwrap()).unwrap();
    assert_eq!(card["data"]["template_id"], "tpl");
    assert_eq!(card["data"]["template_variable"]["count"], "2");

    // the tenant token is fetched once and reused
    assert_eq!(fake.token_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn every_chat_failing_is_an_error() {
    let fake = Arc::new(FakeLark {
        reject: vec!["oc_1".into(), "oc_2".into(), "oc_3".into()],
        ..FakeLark::default()
    });
    let lark = consumer(serve(fake.clone()).await);

    let err = lark.push_batch(&posts()).await.unwrap_err();
    assert!(format!("{err:#}").contains("every lark chat failed"), "{err:#}");
    assert!(fake.sent.lock().is_empty());
}

#[tokio::test]
async fn chat_listing_failure_is_an_error() {
    let fake = Arc::new(FakeLark {
        list_fails: true,
        ..FakeLark::default()
    });
    let lark = consumer(serve(fake.clone()).await);

    let err = lark.push_batch(&posts()).await.unwrap_err();
    assert!(format!("{err:#}").contains("lark chat list error"), "{err:#}");
    assert!(fake.sent.lock().is_empty());
}
