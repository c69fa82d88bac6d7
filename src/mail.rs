//! HTML alert e-mails for pipeline notifications.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{QuatiError, Result};

const LOGO_CONTENT_ID: &str = "brand_logo";
pub const DEFAULT_LOGO_URL: &str =
    "https://raw.githubusercontent.com/quati-dev/quati/refs/heads/main/assets/quati.png";

/// Severity of an alert; selects colour, glyph and label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    #[default]
    Error,
    Important,
    Note,
    Tip,
    Warning,
}

/// Presentation of an [`AlertKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub accent: &'static str,
    pub glyph: &'static str,
    pub alias: &'static str,
}

impl AlertKind {
    pub const ALL: [AlertKind; 5] = [
        AlertKind::Error,
        AlertKind::Important,
        AlertKind::Note,
        AlertKind::Tip,
        AlertKind::Warning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Error => "error",
            AlertKind::Important => "important",
            AlertKind::Note => "note",
            AlertKind::Tip => "tip",
            AlertKind::Warning => "warning",
        }
    }

    pub fn theme(&self) -> Theme {
        let (accent, glyph, alias) = match self {
            AlertKind::Error => ("#E63946", "🔴", "Critical Error"),
            AlertKind::Important => ("#8338EC", "🔥", "Priority"),
            AlertKind::Note => ("#3A86FF", "📝", "Information"),
            AlertKind::Tip => ("#06D6A0", "✨", "Insight"),
            AlertKind::Warning => ("#FFBE0B", "🔸", "Warning"),
        };
        Theme {
            accent,
            glyph,
            alias,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = QuatiError;

    fn from_str(s: &str) -> Result<Self> {
        AlertKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| QuatiError::UnsupportedAlert(s.to_string()))
    }
}

/// Content of one notification.
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub summary: String,
    pub title: String,
    pub datetime: String,
    pub message: String,
    pub context: String,
    /// Extra `label: value` lines, rendered in order.
    pub extra: Vec<(String, String)>,
    pub files: Vec<PathBuf>,
    /// Overrides the dispatcher's default list when set.
    pub recipients: Option<Vec<String>>,
}

impl Default for Alert {
    fn default() -> Self {
        Self {
            kind: AlertKind::Error,
            summary: "N/A".to_string(),
            title: "System Notification".to_string(),
            datetime: "Unknown Time".to_string(),
            message: "Empty Body".to_string(),
            context: "General".to_string(),
            extra: Vec::new(),
            files: Vec::new(),
            recipients: None,
        }
    }
}

impl Alert {
    pub fn subject(&self) -> String {
        format!(
            "System Notification • [{}] {}",
            self.kind.theme().alias.to_uppercase(),
            self.title
        )
    }

    pub fn render_html(&self) -> String {
        let theme = self.kind.theme();
        let extra: String = self
            .extra
            .iter()
            .map(|(key, value)| format!("<div style='margin-bottom: 4px;'><b>{key}:</b> {value}</div>"))
            .collect();

        HTML_TEMPLATE
            .replace("{{accent}}", theme.accent)
            .replace("{{glyph}}", theme.glyph)
            .replace("{{logo_cid}}", LOGO_CONTENT_ID)
            .replace("{{title}}", &self.title)
            .replace("{{summary}}", &self.summary)
            .replace("{{message}}", &self.message)
            .replace("{{datetime}}", &self.datetime)
            .replace("{{context}}", &self.context)
            .replace("{{extra}}", &extra)
    }
}

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<style>
  .canvas { background-color: #f4f7f6; padding: 50px 20px; font-family: 'Segoe UI', Roboto, Helvetica, Arial, sans-serif; }
  .paper { max-width: 550px; margin: 0 auto; background: #ffffff; border-radius: 20px; box-shadow: 0 4px 15px rgba(0,0,0,0.05); padding: 40px; }
  .badge { display: inline-block; background: {{accent}}15; color: {{accent}}; padding: 6px 14px; border-radius: 50px; font-size: 11px; font-weight: 700; text-transform: uppercase; letter-spacing: 1px; margin-bottom: 20px; }
  .headline { font-size: 22px; color: #1a1a1a; margin: 0 0 15px 0; font-weight: 600; }
  .txt { color: #525252; font-size: 15px; line-height: 1.7; margin-bottom: 25px; }
  .bubble { background: #fdfdfd; border: 1px dashed #e0e0e0; padding: 20px; border-radius: 12px; margin: 25px 0; color: #444; font-size: 14px; }
  .info-grid { font-size: 13px; color: #888; border-top: 1px solid #eee; margin-top: 30px; padding-top: 20px; line-height: 1.8; }
  .footer { text-align: center; font-size: 12px; color: #b0b0b0; margin-top: 30px; }
</style>
</head>
<body>
<div class="canvas">
  <div style="text-align: center; margin-bottom: 25px;">
    <img src="cid:{{logo_cid}}" width="80" style="opacity: 0.8;">
  </div>
  <div class="paper">
    <span class="badge">{{glyph}} {{title}}</span>
    <h1 class="headline">A new automated update has arrived:</h1>
    <p class="txt">{{summary}}</p>
    <div class="bubble">
      <strong style="font-size: 11px; color: #999; display: block; margin-bottom: 8px;">ADDITIONAL DETAILS:</strong>
      {{message}}
    </div>
    <div class="info-grid">
      <div><b>Date and time:</b> {{datetime}}</div>
      <div><b>Context:</b> {{context}}</div>
      {{extra}}
    </div>
  </div>
  <div class="footer">
    Sent via <b>Quati</b><br>
    This is an automated system notification.
  </div>
</div>
</body>
</html>"#;

/// Delivers a finished message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<()>;
}

/// SMTP with STARTTLS and login credentials.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(host: &str, port: u16, user: &str, secret: &str) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(port)
            .credentials(Credentials::new(user.to_string(), secret.to_string()))
            .build();
        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: Message) -> Result<()> {
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Sends [`Alert`]s from one account to a default recipient list.
pub struct Dispatcher<T = SmtpMailer> {
    sender: Mailbox,
    default_recipients: Vec<Mailbox>,
    logo_url: String,
    http: Client,
    transport: T,
}

impl Dispatcher<SmtpMailer> {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let secret = cfg
            .mail
            .secret
            .as_deref()
            .ok_or_else(|| QuatiError::Config("mail secret is not set".to_string()))?;
        let transport = SmtpMailer::new(
            &cfg.mail.smtp_host,
            cfg.mail.smtp_port,
            &cfg.mail.sender,
            secret,
        )?;
        Ok(Self::with_transport(&cfg.mail.sender, &cfg.mail.default_recipients, transport)?
            .with_logo_url(&cfg.mail.logo_url))
    }
}

impl<T: MailTransport> Dispatcher<T> {
    pub fn with_transport(sender: &str, default_recipients: &[String], transport: T) -> Result<Self> {
        Ok(Self {
            sender: sender.parse()?,
            default_recipients: parse_mailboxes(default_recipients)?,
            logo_url: DEFAULT_LOGO_URL.to_string(),
            http: Client::new(),
            transport,
        })
    }

    pub fn with_logo_url(mut self, logo_url: &str) -> Self {
        self.logo_url = logo_url.to_string();
        self
    }

    async fn fetch_logo(&self) -> Option<Vec<u8>> {
        let fetched = async {
            let response = self.http.get(&self.logo_url).send().await?.error_for_status()?;
            response.bytes().await
        };
        match fetched.await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                tracing::warn!(url = %self.logo_url, error = %e, "Could not embed logo");
                None
            }
        }
    }

    /// Assemble the MIME message for `alert` without sending it.
    pub async fn build_message(&self, alert: &Alert) -> Result<Message> {
        let recipients = match &alert.recipients {
            Some(list) => parse_mailboxes(list)?,
            None => self.default_recipients.clone(),
        };
        if recipients.is_empty() {
            return Err(QuatiError::Mail("no recipients for alert".to_string()));
        }

        let mut related = MultiPart::related().singlepart(SinglePart::html(alert.render_html()));
        if let Some(logo) = self.fetch_logo().await {
            related = related.singlepart(
                Attachment::new_inline(LOGO_CONTENT_ID.to_string())
                    .body(logo, ContentType::parse("image/png")?),
            );
        }

        let mut body = MultiPart::mixed().multipart(related);
        for path in &alert.files {
            body = body.singlepart(file_attachment(path).await?);
        }

        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(alert.subject());
        for to in recipients {
            builder = builder.to(to);
        }
        Ok(builder.multipart(body)?)
    }

    /// Render and send `alert`.
    pub async fn push(&self, alert: &Alert) -> Result<()> {
        let message = self.build_message(alert).await?;
        self.transport.send(message).await?;
        tracing::info!(kind = %alert.kind, title = %alert.title, "Alert sent");
        Ok(())
    }
}

fn parse_mailboxes(addresses: &[String]) -> Result<Vec<Mailbox>> {
    addresses
        .iter()
        .map(|a| a.parse::<Mailbox>().map_err(QuatiError::from))
        .collect()
}

async fn file_attachment(path: &Path) -> Result<SinglePart> {
    let content = tokio::fs::read(path).await?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Ok(Attachment::new(filename).body(content, ContentType::parse(mime.essence_str())?))
}
