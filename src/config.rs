// src/config.rs
//! Process configuration: optional TOML file plus environment overrides.
//! Read once at startup and immutable afterwards.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PATH: &str = "RELAY_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/relay.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RssSource {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DiscordCfg {
    pub webhooks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SlackCfg {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LarkCfg {
    /// Newline-separated webhook URLs, re-read on every push.
    pub webhooks_file: Option<PathBuf>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToggleCfg {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArchiveCfg {
    pub enabled: bool,
}

impl Default for ArchiveCfg {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeedCfg {
    /// Listen address; no server when unset.
    pub addr: Option<String>,
    pub max_items: usize,
    pub title: String,
    pub link: String,
}

impl Default for FeedCfg {
    fn default() -> Self {
        Self {
            addr: None,
            max_items: crate::feed::DEFAULT_MAX_ITEMS,
            title: "feed-relay".to_string(),
            link: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub scan_interval_secs: u64,
    pub cycle_timeout_secs: Option<u64>,
    /// 0 = unlimited.
    pub max_batch_size: usize,
    pub db_path: PathBuf,
    /// Provider names to activate; `None` activates every configured provider.
    pub enable_modules: Option<Vec<String>>,
    pub rss: Vec<RssSource>,
    pub discord: DiscordCfg,
    pub slack: SlackCfg,
    pub lark: LarkCfg,
    pub email: ToggleCfg,
    pub log: ToggleCfg,
    pub archive: ArchiveCfg,
    pub feed: FeedCfg,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 600,
            cycle_timeout_secs: None,
            max_batch_size: 0,
            db_path: PathBuf::from("data/relay.db"),
            enable_modules: None,
            rss: Vec::new(),
            discord: DiscordCfg::default(),
            slack: SlackCfg::default(),
            lark: LarkCfg::default(),
            email: ToggleCfg::default(),
            log: ToggleCfg::default(),
            archive: ArchiveCfg::default(),
            feed: FeedCfg::default(),
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(str::to_string)
        .collect()
}

impl RelayConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing relay config toml")
    }

    /// Load from an explicit path (no env overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $RELAY_CONFIG_PATH (must exist)
    /// 2) config/relay.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_PATH))?
        } else {
            Self::default()
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Environment overrides. Unparseable numbers are ignored with a warning.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        fn num<T: std::str::FromStr>(key: &str, v: Option<String>) -> Option<T> {
            let v = v?;
            match v.trim().parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    tracing::warn!(key, value = %v, "ignoring unparseable env override");
                    None
                }
            }
        }

        if let Some(n) = num("SCAN_INTERVAL_SECS", get("SCAN_INTERVAL_SECS")) {
            self.scan_interval_secs = n;
        }
        if let Some(n) = num("CYCLE_TIMEOUT_SECS", get("CYCLE_TIMEOUT_SECS")) {
            self.cycle_timeout_secs = Some(n);
        }
        // Only a positive count enables the cap.
        if let Some(n) = num::<i64>("MAX_COUNT_PER_PUSH", get("MAX_COUNT_PER_PUSH")) {
            if n > 0 {
                self.max_batch_size = n as usize;
            }
        }
        if let Some(p) = get("DB_PATH") {
            self.db_path = PathBuf::from(p);
        }
        if let Some(m) = get("ENABLE_MODULES") {
            self.enable_modules = Some(split_list(&m));
        }
        if let Some(url) = get("DISCORD_WEBHOOK_URL") {
            self.discord.webhooks.extend(split_list(&url));
        }
        if let Some(url) = get("SLACK_WEBHOOK_URL").filter(|u| !u.trim().is_empty()) {
            self.slack.webhook_url = Some(url);
        }
        if let Some(p) = get("LARK_WEBHOOKS") {
            self.lark.webhooks_file = Some(PathBuf::from(p));
        }
        if let Some(id) = get("LARK_APP_ID") {
            self.lark.app_id = Some(id);
        }
        if let Some(secret) = get("LARK_APP_SECRET") {
            self.lark.app_secret = Some(secret);
        }
        if let Some(v) = get("NOTIFY_EMAIL_ENABLED") {
            self.email.enabled = matches!(v.trim(), "1" | "true" | "yes");
        }
        if let Some(addr) = get("FEED_ADDR") {
            self.feed.addr = Some(addr);
        }
        if let Some(n) = num("MAX_FEED_ITEM_COUNT", get("MAX_FEED_ITEM_COUNT")) {
            self.feed.max_items = n;
        }
    }

    /// RSS sources left after `enable_modules` filtering.
    pub fn active_rss(&self) -> Vec<&RssSource> {
        self.rss
            .iter()
            .filter(|s| match &self.enable_modules {
                Some(enabled) => enabled.iter().any(|m| m.eq_ignore_ascii_case(&s.name)),
                None => true,
            })
            .collect()
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.cycle_timeout_secs.map(Duration::from_secs)
    }

    /// Startup checks; any error here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            bail!("scan interval must be positive");
        }
        if self.cycle_timeout_secs == Some(0) {
            bail!("cycle timeout must be positive");
        }
        let mut names = std::collections::HashSet::new();
        for s in &self.rss {
            if s.name.trim().is_empty() || s.url.trim().is_empty() {
                bail!("rss source needs both name and url");
            }
            if !names.insert(s.name.as_str()) {
                bail!("duplicate provider name {:?}", s.name);
            }
        }
        if self.active_rss().is_empty() {
            bail!("no providers configured");
        }
        Ok(())
    }
}
