// src/notify/lark.rs
//! Lark (Feishu) interactive-card delivery, over incoming webhooks or as an
//! app bot posting into every chat it belongs to.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::post_json_with_retries;
use crate::post::{PictureRef, Post};
use crate::sync::Consumer;

pub const DEFAULT_TEMPLATE_ID: &str = "AAqdTMBQENhuz";
/// Shown when a picture is missing or its upload failed.
pub const FALLBACK_IMAGE_KEY: &str = "img_v3_02nc_aa0dfc39-5024-4d47-a9a1-00d99a81a09g";
const DEFAULT_BASE_URL: &str = "https://open.feishu.cn";
const CHAT_PAGE_SIZE: &str = "20";

/// Turns a picture into a Lark image key.
#[async_trait::async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(&self, picture: &PictureRef) -> Result<String>;
}

#[derive(Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: u64,
}

/// Minimal envelope every open API response carries.
#[derive(Deserialize)]
struct ApiStatus {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChatItem {
    pub chat_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPage {
    #[serde(default)]
    items: Vec<ChatItem>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Deserialize)]
struct ChatListResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<ChatPage>,
}

#[derive(Deserialize)]
struct ImageData {
    image_key: String,
}

#[derive(Deserialize)]
struct ImageResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<ImageData>,
}

/// App credentials for the Lark open API. The tenant token is cached until
/// shortly before it expires and shared by everything holding the same `Arc`.
pub struct LarkApp {
    client: Client,
    base_url: String,
    app_id: String,
    app_secret: String,
    token: Mutex<Option<(String, Instant)>>,
}

impl LarkApp {
    pub fn new(client: Client, app_id: String, app_secret: String) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            app_id,
            app_secret,
            token: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    async fn tenant_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, valid_until)) = cached.as_ref() {
            if Instant::now() < *valid_until {
                return Ok(token.clone());
            }
        }

        let rsp: TokenResponse = self
            .client
            .post(format!(
                "{}/open-apis/auth/v3/tenant_access_token/internal",
                self.base_url
            ))
            .json(&json!({ "app_id": self.app_id, "app_secret": self.app_secret }))
            .send()
            .await
            .context("lark token request")?
            .error_for_status()
            .context("lark token non-2xx")?
            .json()
            .await
            .context("lark token body")?;
        if rsp.code != 0 {
            bail!("lark token error {}: {}", rsp.code, rsp.msg);
        }

        let ttl = Duration::from_secs(rsp.expire.saturating_sub(60).max(60));
        *cached = Some((rsp.tenant_access_token.clone(), Instant::now() + ttl));
        Ok(rsp.tenant_access_token)
    }
}

/// Uploads pictures as message images with the app's tenant token.
pub struct LarkImageUploader {
    app: Arc<LarkApp>,
}

impl LarkImageUploader {
    pub fn new(app: Arc<LarkApp>) -> Self {
        Self { app }
    }
}

#[async_trait::async_trait]
impl ImageUploader for LarkImageUploader {
    async fn upload(&self, picture: &PictureRef) -> Result<String> {
        let app = &self.app;
        let bytes = picture.resolve(&app.client).await?;
        let token = app.tenant_token().await?;

        let form = reqwest::multipart::Form::new()
            .text("image_type", "message")
            .part(
                "image",
                reqwest::multipart::Part::bytes(bytes).file_name("image"),
            );
        let rsp: ImageResponse = app
            .client
            .post(format!("{}/open-apis/im/v1/images", app.base_url))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .context("lark image upload")?
            .error_for_status()
            .context("lark image upload non-2xx")?
            .json()
            .await
            .context("lark image upload body")?;
        match (rsp.code, rsp.data) {
            (0, Some(data)) => Ok(data.image_key),
            (code, _) => Err(anyhow!("lark image upload error {code}: {}", rsp.msg)),
        }
    }
}

/// Where webhook URLs come from. A file is re-read on every push so targets
/// can change without a restart.
#[derive(Debug, Clone)]
pub enum WebhookList {
    Static(Vec<String>),
    File(PathBuf),
}

impl WebhookList {
    pub async fn load(&self) -> Result<Vec<String>> {
        match self {
            WebhookList::Static(v) => Ok(v.clone()),
            WebhookList::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(content) => Ok(parse_webhook_lines(&content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(path = %path.display(), "lark webhooks file not found");
                    Ok(Vec::new())
                }
                Err(e) => {
                    Err(e).with_context(|| format!("reading webhooks from {}", path.display()))
                }
            },
        }
    }
}

fn parse_webhook_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub struct LarkWebhookConsumer {
    client: Client,
    webhooks: WebhookList,
    uploader: Option<Arc<dyn ImageUploader>>,
    template_id: String,
}

impl LarkWebhookConsumer {
    pub fn new(client: Client, webhooks: WebhookList) -> Self {
        Self {
            client,
            webhooks,
            uploader: None,
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ImageUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = template_id.into();
        self
    }
}

/// One image key per post; missing pictures and failed uploads get the fallback.
async fn image_keys(uploader: Option<&Arc<dyn ImageUploader>>, posts: &[Post]) -> Vec<String> {
    let Some(uploader) = uploader else {
        return vec![FALLBACK_IMAGE_KEY.to_string(); posts.len()];
    };
    join_all(posts.iter().map(|p| async move {
        let Some(picture) = &p.picture_ref else {
            return FALLBACK_IMAGE_KEY.to_string();
        };
        match uploader.upload(picture).await {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(error = ?e, post = %p.key(), "lark image upload failed");
                FALLBACK_IMAGE_KEY.to_string()
            }
        }
    }))
    .await
}

fn tag_markup(tags: &[String]) -> String {
    tags.iter()
        .map(|t| format!("<text_tag color='blue'>{t}</text_tag> "))
        .collect()
}

/// Interactive template card with one entry per post.
pub fn build_card(template_id: &str, posts: &[Post], image_keys: &[String]) -> Value {
    let entries: Vec<Value> = posts
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let img = image_keys
                .get(i)
                .map(String::as_str)
                .unwrap_or(FALLBACK_IMAGE_KEY);
            json!({
                "img": { "img_key": img },
                "title": format!("{}{}", p.title, tag_markup(&p.tags)),
                "titleraw": p.title,
                "senddate": p.published_datetime().format("%Y-%m-%d %H:%M:%S").to_string(),
                "url": { "url": p.url },
                "author": p.author,
                "author_url": p.author_url,
                "description": p.description,
                "source": p.source,
            })
        })
        .collect();

    json!({
        "type": "template",
        "data": {
            "template_id": template_id,
            "template_variable": {
                "count": posts.len().to_string(),
                "object_img": entries,
            },
        },
    })
}

/// Incoming-webhook payload: the card is embedded as an object.
fn webhook_body(card: &Value) -> Value {
    json!({ "msg_type": "interactive", "card": card })
}

/// `im/v1/messages` payload: the card travels as a JSON string.
pub fn chat_message_body(chat_id: &str, card: &Value) -> Value {
    json!({
        "receive_id": chat_id,
        "msg_type": "interactive",
        "content": card.to_string(),
    })
}

#[async_trait::async_trait]
impl Consumer for LarkWebhookConsumer {
    async fn push_batch(&self, posts: &[Post]) -> Result<()> {
        let webhooks = self.webhooks.load().await?;
        if webhooks.is_empty() {
            tracing::debug!("lark: no webhooks configured, nothing to push");
            return Ok(());
        }

        let keys = image_keys(self.uploader.as_ref(), posts).await;
        let card = webhook_body(&build_card(&self.template_id, posts, &keys));

        let mut delivered = 0usize;
        let mut last_err = None;
        for webhook in &webhooks {
            let res =
                post_json_with_retries(&self.client, webhook, &card, Duration::from_secs(10), 3)
                    .await
                    .map(|_| ());
            match res {
                Ok(()) => {
                    delivered += 1;
                    tracing::info!(webhook = %webhook, count = posts.len(), "lark card pushed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, webhook = %webhook, "lark webhook failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if delivered == 0 => Err(e.context("every lark webhook failed")),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "lark"
    }
}

/// Follows `page_token` until the listing reports no more pages.
async fn collect_chats<F, Fut>(mut fetch_page: F) -> Result<Vec<ChatItem>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ChatPage>>,
{
    let mut chats = Vec::new();
    let mut page_token = None;
    loop {
        let page = fetch_page(page_token.take()).await?;
        chats.extend(page.items);
        match page.page_token.filter(|t| !t.is_empty()) {
            Some(next) if page.has_more => page_token = Some(next),
            _ => return Ok(chats),
        }
    }
}

/// Sends the card, as the app bot, to every chat the bot is a member of.
pub struct LarkChatConsumer {
    app: Arc<LarkApp>,
    uploader: Option<Arc<dyn ImageUploader>>,
    template_id: String,
}

impl LarkChatConsumer {
    pub fn new(app: Arc<LarkApp>) -> Self {
        Self {
            app,
            uploader: None,
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ImageUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = template_id.into();
        self
    }

    fn chat_list_request(
        &self,
        token: &str,
        page_token: Option<&str>,
    ) -> reqwest::Result<reqwest::Request> {
        let mut req = self
            .app
            .client
            .get(format!("{}/open-apis/im/v1/chats", self.app.base_url))
            .bearer_auth(token)
            .query(&[("page_size", CHAT_PAGE_SIZE)]);
        if let Some(t) = page_token {
            req = req.query(&[("page_token", t)]);
        }
        req.build()
    }

    fn message_request(
        &self,
        token: &str,
        chat_id: &str,
        card: &Value,
    ) -> reqwest::Result<reqwest::Request> {
        self.app
            .client
            .post(format!("{}/open-apis/im/v1/messages", self.app.base_url))
            .bearer_auth(token)
            .query(&[("receive_id_type", "chat_id")])
            .timeout(Duration::from_secs(10))
            .json(&chat_message_body(chat_id, card))
            .build()
    }

    async fn chat_page(&self, token: &str, page_token: Option<&str>) -> Result<ChatPage> {
        let req = self
            .chat_list_request(token, page_token)
            .context("build lark chat list request")?;
        let rsp: ChatListResponse = self
            .app
            .client
            .execute(req)
            .await
            .context("lark chat list request")?
            .error_for_status()
            .context("lark chat list non-2xx")?
            .json()
            .await
            .context("lark chat list body")?;
        if rsp.code != 0 {
            bail!("lark chat list error {}: {}", rsp.code, rsp.msg);
        }
        Ok(rsp.data.unwrap_or_default())
    }

    pub async fn list_chats(&self) -> Result<Vec<ChatItem>> {
        let token = self.app.tenant_token().await?;
        collect_chats(|page_token| {
            let token = token.clone();
            async move { self.chat_page(&token, page_token.as_deref()).await }
        })
        .await
    }

    async fn send(&self, token: &str, chat_id: &str, card: &Value) -> Result<()> {
        let req = self
            .message_request(token, chat_id, card)
            .context("build lark message request")?;
        let rsp = self
            .app
            .client
            .execute(req)
            .await
            .context("lark message request")?;
        let status = rsp.status();
        // Lark reports failures in the body, usually alongside a 4xx.
        let body: ApiStatus = rsp
            .json()
            .await
            .with_context(|| format!("lark message body (HTTP {status})"))?;
        if body.code != 0 {
            bail!("lark message error {}: {}", body.code, body.msg);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Consumer for LarkChatConsumer {
    async fn push_batch(&self, posts: &[Post]) -> Result<()> {
        let chats = self.list_chats().await.context("listing lark chats")?;
        if chats.is_empty() {
            tracing::debug!(app_id = %self.app.app_id, "lark: bot is in no chats");
            return Ok(());
        }

        let keys = image_keys(self.uploader.as_ref(), posts).await;
        let card = build_card(&self.template_id, posts, &keys);
        let token = self.app.tenant_token().await?;

        let mut delivered = 0usize;
        let mut last_err = None;
        for chat in &chats {
            match self.send(&token, &chat.chat_id, &card).await {
                Ok(()) => {
                    delivered += 1;
                    tracing::info!(
                        chat_id = %chat.chat_id,
                        chat = %chat.name,
                        count = posts.len(),
                        "lark card sent"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        chat_id = %chat.chat_id,
                        chat = %chat.name,
                        "lark chat send failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if delivered == 0 => Err(e.context("every lark chat failed")),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "lark-chat"
    }
}
