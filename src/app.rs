// src/app.rs
//! Wires configuration into providers, consumers, the engine and the feed server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveConsumer, PostArchive};
use crate::config::RelayConfig;
use crate::cursor::SledCursorStore;
use crate::feed::{self, FeedState};
use crate::notify::{
    DiscordConsumer, EmailConsumer, ImageUploader, LarkApp, LarkChatConsumer, LarkImageUploader,
    LarkWebhookConsumer, LogConsumer, SlackConsumer, WebhookList,
};
use crate::providers::RssProvider;
use crate::sync::scheduler::{spawn_scheduler, SchedulerCfg};
use crate::sync::{Consumer, Provider, SyncEngine};

/// Shared outbound HTTP client, passed explicitly to every component that needs one.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent(concat!("feed-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build http client")
}

pub fn build_providers(cfg: &RelayConfig, client: &reqwest::Client) -> Vec<Arc<dyn Provider>> {
    cfg.active_rss()
        .into_iter()
        .map(|s| {
            tracing::info!(provider = %s.name, url = %s.url, "rss provider enabled");
            Arc::new(RssProvider::from_url(&s.name, &s.url, client.clone())) as Arc<dyn Provider>
        })
        .collect()
}

pub fn build_consumers(
    cfg: &RelayConfig,
    client: &reqwest::Client,
    archive: Option<PostArchive>,
) -> Result<Vec<Arc<dyn Consumer>>> {
    let mut out: Vec<Arc<dyn Consumer>> = Vec::new();

    if let Some(archive) = archive {
        out.push(Arc::new(ArchiveConsumer::new(archive)));
    }
    for (i, hook) in cfg.discord.webhooks.iter().enumerate() {
        let name = if i == 0 {
            "discord".to_string()
        } else {
            format!("discord#{}", i + 1)
        };
        out.push(Arc::new(
            DiscordConsumer::new(hook.clone(), client.clone()).named(name),
        ));
    }
    if let Some(url) = &cfg.slack.webhook_url {
        out.push(Arc::new(SlackConsumer::new(url.clone(), client.clone())));
    }
    let lark_app = match (&cfg.lark.app_id, &cfg.lark.app_secret) {
        (Some(id), Some(secret)) => Some(Arc::new(LarkApp::new(
            client.clone(),
            id.clone(),
            secret.clone(),
        ))),
        (Some(_), None) | (None, Some(_)) => {
            tracing::warn!("lark app bot needs both app_id and app_secret; ignoring");
            None
        }
        (None, None) => None,
    };
    let lark_uploader = lark_app
        .as_ref()
        .map(|app| Arc::new(LarkImageUploader::new(Arc::clone(app))) as Arc<dyn ImageUploader>);

    if let Some(app) = &lark_app {
        let mut chats = LarkChatConsumer::new(Arc::clone(app));
        if let Some(uploader) = &lark_uploader {
            chats = chats.with_uploader(Arc::clone(uploader));
        }
        if let Some(t) = &cfg.lark.template_id {
            chats = chats.with_template(t.clone());
        }
        tracing::info!(app_id = %app.app_id(), "lark chat consumer enabled");
        out.push(Arc::new(chats));
    }
    if let Some(path) = &cfg.lark.webhooks_file {
        let mut lark = LarkWebhookConsumer::new(client.clone(), WebhookList::File(path.clone()));
        if let Some(uploader) = &lark_uploader {
            lark = lark.with_uploader(Arc::clone(uploader));
        }
        if let Some(t) = &cfg.lark.template_id {
            lark = lark.with_template(t.clone());
        }
        tracing::info!(file = %path.display(), "lark webhook consumer enabled");
        out.push(Arc::new(lark));
    }
    if cfg.email.enabled {
        out.push(Arc::new(EmailConsumer::from_env().context("email consumer")?));
    }
    if cfg.log.enabled {
        out.push(Arc::new(LogConsumer));
    }

    if out.is_empty() {
        tracing::warn!("no consumers configured; posts will only advance the cursor");
    }
    Ok(out)
}

pub struct App {
    pub engine: Arc<SyncEngine>,
    scheduler: SchedulerCfg,
    feed: Option<(String, axum::Router)>,
}

impl App {
    /// Open storage and assemble every component. `metrics` is exposed on the
    /// feed server when given.
    pub fn build(
        cfg: &RelayConfig,
        metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
    ) -> Result<Self> {
        cfg.validate()?;

        if let Some(dir) = cfg.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let db = sled::open(&cfg.db_path)
            .with_context(|| format!("failed to open database at {}", cfg.db_path.display()))?;
        let cursor = SledCursorStore::from_db(&db).context("open cursor store")?;
        let archive = if cfg.archive.enabled || cfg.feed.addr.is_some() {
            Some(PostArchive::from_db(&db)?)
        } else {
            None
        };

        let client = http_client()?;
        let providers = build_providers(cfg, &client);
        let consumers = build_consumers(
            cfg,
            &client,
            archive.clone().filter(|_| cfg.archive.enabled),
        )?;

        let engine = SyncEngine::new(providers, consumers, Arc::new(cursor))
            .with_max_batch_size(cfg.max_batch_size);

        let feed = match (&cfg.feed.addr, archive) {
            (Some(addr), Some(archive)) => {
                let state = FeedState {
                    archive,
                    max_items: cfg.feed.max_items,
                    title: cfg.feed.title.clone(),
                    link: cfg.feed.link.clone(),
                };
                Some((addr.clone(), feed::create_router(state, metrics)))
            }
            _ => None,
        };

        Ok(Self {
            engine: Arc::new(engine),
            scheduler: SchedulerCfg {
                interval: cfg.scan_interval(),
                cycle_timeout: cfg.cycle_timeout(),
            },
            feed,
        })
    }

    /// Run the scan loop (and the feed server, if configured) until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let scan = spawn_scheduler(Arc::clone(&self.engine), self.scheduler, cancel.clone());

        if let Some((addr, router)) = self.feed {
            if let Err(e) = serve_feed(&addr, router, cancel.clone()).await {
                // A dead feed server takes the scan loop down with it.
                cancel.cancel();
                let _ = scan.await;
                return Err(e);
            }
        }

        scan.await.context("scan loop task")?;
        Ok(())
    }
}

async fn serve_feed(addr: &str, router: axum::Router, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding feed server on {addr}"))?;
    tracing::info!(%addr, "feed server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("feed server")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LarkCfg;

    fn names(consumers: &[Arc<dyn Consumer>]) -> Vec<String> {
        consumers.iter().map(|c| c.name().to_string()).collect()
    }

    #[test]
    fn lark_app_credentials_alone_enable_the_chat_consumer() {
        let mut cfg = RelayConfig::default();
        cfg.lark = LarkCfg {
            app_id: Some("cli_x".into()),
            app_secret: Some("secret".into()),
            ..LarkCfg::default()
        };
        let consumers = build_consumers(&cfg, &reqwest::Client::new(), None).unwrap();
        assert_eq!(names(&consumers), vec!["lark-chat"]);
    }

    #[test]
    fn lark_webhooks_and_app_run_side_by_side() {
        let mut cfg = RelayConfig::default();
        cfg.lark = LarkCfg {
            webhooks_file: Some("webhooks.txt".into()),
            app_id: Some("cli_x".into()),
            app_secret: Some("secret".into()),
            ..LarkCfg::default()
        };
        cfg.log.enabled = true;
        let consumers = build_consumers(&cfg, &reqwest::Client::new(), None).unwrap();
        assert_eq!(names(&consumers), vec!["lark-chat", "lark", "log"]);
    }

    #[test]
    fn lark_app_id_without_secret_adds_nothing() {
        let mut cfg = RelayConfig::default();
        cfg.lark.app_id = Some("cli_x".into());
        let consumers = build_consumers(&cfg, &reqwest::Client::new(), None).unwrap();
        assert!(consumers.is_empty());
    }
}
