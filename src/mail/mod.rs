//! Digest mail
//!
//! Composes the digest document (model-written intro plus per-item blocks),
//! renders it to standalone HTML, and hands it to the mail transport. In
//! skip-email mode the rendered HTML is returned to the caller instead.

use crate::cancel::CancelToken;
use crate::config::MailConfig;
use crate::error::{Error, Result};
use crate::llm::{DigestIntro, IntroService};
use crate::profile::UserProfile;
use crate::rank::RankedItem;
use async_trait::async_trait;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tracing::{info, warn};

/// Outbound mail submission
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Submit one message; blocking until the server accepts it
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()>;
}

/// SMTP transport (STARTTLS submission)
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let password = std::env::var(&config.password_env).map_err(|_| {
            Error::Config(format!(
                "SMTP password not set (expected environment variable {})",
                config.password_env
            ))
        })?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| Error::Transport(format!("SMTP relay: {}", e)))?
            .port(config.smtp_port)
            .credentials(Credentials::new(config.username.clone(), password))
            .build();

        Ok(Self {
            transport,
            from: config.username.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| Error::Transport(format!("from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| Error::Transport(format!("to address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| Error::Transport(format!("message build: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::Transport(format!("SMTP submit: {}", e)))?;
        Ok(())
    }
}

/// Outcome of the email stage
#[derive(Debug, Clone)]
pub struct DigestDelivery {
    /// Rendered HTML; always present
    pub html: String,
    pub subject: String,
    /// True when mail was actually submitted
    pub sent: bool,
}

/// Digest composer and sender
pub struct DigestMailer {
    intro: IntroService,
    transport: Option<Arc<dyn MailTransport>>,
    recipient: String,
    subject: Option<String>,
}

impl DigestMailer {
    pub fn new(
        intro: IntroService,
        transport: Option<Arc<dyn MailTransport>>,
        recipient: String,
        subject: Option<String>,
    ) -> Self {
        Self {
            intro,
            transport,
            recipient,
            subject,
        }
    }

    fn subject_line(&self, override_subject: Option<&str>) -> String {
        override_subject
            .map(|s| s.to_string())
            .or_else(|| self.subject.clone())
            .unwrap_or_else(|| format!("Your news digest - {}", Utc::now().format("%B %e, %Y")))
    }

    /// Compose and (unless skipped) submit the digest.
    ///
    /// Intro-composition failures degrade to a static greeting; transport
    /// failures are returned to the caller, who records them as advisory.
    pub async fn deliver(
        &self,
        profile: &UserProfile,
        ranked: &[RankedItem],
        recipient: Option<&str>,
        subject: Option<&str>,
        skip_email: bool,
        cancel: &CancelToken,
    ) -> Result<DigestDelivery> {
        let intro = match self.intro.compose(profile, ranked, cancel).await {
            Ok(intro) => intro,
            Err(e) => {
                warn!("Intro composition failed, using fallback: {}", e);
                DigestIntro::fallback(profile, ranked.len())
            }
        };

        let subject = self.subject_line(subject);
        let html = render_digest_html(&intro, ranked);

        if skip_email {
            info!("Skip-email mode; returning rendered digest");
            return Ok(DigestDelivery {
                html,
                subject,
                sent: false,
            });
        }

        let to = recipient.unwrap_or(&self.recipient);
        if to.is_empty() {
            return Err(Error::Config("no digest recipient configured".to_string()));
        }
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| Error::Config("no mail transport configured".to_string()))?;

        cancel.check()?;
        transport.send(to, &subject, &html).await?;
        info!(recipient = to, items = ranked.len(), "Digest sent");

        Ok(DigestDelivery {
            html,
            subject,
            sent: true,
        })
    }
}

/// Render the digest document to standalone HTML
pub fn render_digest_html(intro: &DigestIntro, ranked: &[RankedItem]) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <style>\n\
         body { font-family: Georgia, serif; max-width: 640px; margin: 0 auto; \
         padding: 24px; color: #222; }\n\
         .item { margin-bottom: 28px; border-bottom: 1px solid #ddd; padding-bottom: 16px; }\n\
         .meta { color: #666; font-size: 13px; }\n\
         .score { color: #2a6; font-weight: bold; }\n\
         a { color: #06c; }\n\
         </style>\n</head>\n<body>\n",
    );

    out.push_str(&format!(
        "<p>{}</p>\n<p>{}</p>\n<hr>\n",
        escape_html(&intro.greeting),
        escape_html(&intro.overview)
    ));

    for item in ranked {
        out.push_str(&format!(
            "<div class=\"item\">\n\
             <h3>{rank}. <a href=\"{url}\">{title}</a></h3>\n\
             <p class=\"meta\">{source} · {published} · \
             <span class=\"score\">{score:.1}/10</span></p>\n\
             <p>{summary}</p>\n\
             </div>\n",
            rank = item.rank,
            url = escape_attr(&item.url),
            title = escape_html(&item.title),
            source = escape_html(&item.source_name),
            published = item.published_at.format("%Y-%m-%d %H:%M UTC"),
            score = item.score,
            summary = escape_html(&item.summary),
        ));
    }

    out.push_str("<p class=\"meta\">Generated by newsbrief.</p>\n</body>\n</html>\n");
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(text: &str) -> String {
    escape_html(text).replace('"', "&quot;")
}
