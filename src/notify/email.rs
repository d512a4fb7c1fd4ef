use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use crate::post::Post;
use crate::sync::Consumer;

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} missing"))
}

/// Plain-text digest of each batch over SMTP.
pub struct EmailConsumer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailConsumer {
    pub fn from_env() -> Result<Self> {
        let host = env_required("SMTP_HOST")?;
        let user = env_required("SMTP_USER")?;
        let pass = env_required("SMTP_PASS")?;
        let from_addr = env_required("NOTIFY_EMAIL_FROM")?;
        let to_addr = env_required("NOTIFY_EMAIL_TO")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid NOTIFY_EMAIL_FROM")?;
        let to = to_addr.parse().context("invalid NOTIFY_EMAIL_TO")?;

        Ok(Self { mailer, from, to })
    }
}

fn render_subject(posts: &[Post]) -> String {
    match posts.first() {
        Some(p) if posts.len() == 1 => format!("New post: {}", p.title),
        _ => format!("{} new posts", posts.len()),
    }
}

fn render_body(posts: &[Post]) -> String {
    let mut body = String::new();
    for p in posts {
        body.push_str(&format!(
            "{}\n  source: {}\n  published: {}\n",
            p.title,
            p.source,
            p.published_datetime().to_rfc3339()
        ));
        if !p.author.is_empty() {
            body.push_str(&format!("  author: {}\n", p.author));
        }
        if !p.url.is_empty() {
            body.push_str(&format!("  link: {}\n", p.url));
        }
        if !p.description.is_empty() {
            body.push_str(&format!("  {}\n", super::truncate_chars(&p.description, 500)));
        }
        body.push('\n');
    }
    body
}

#[async_trait::async_trait]
impl Consumer for EmailConsumer {
    async fn push_batch(&self, posts: &[Post]) -> Result<()> {
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(render_subject(posts))
            .header(header::ContentType::TEXT_PLAIN)
            .body(render_body(posts))
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &str {
        "email"
    }
}
