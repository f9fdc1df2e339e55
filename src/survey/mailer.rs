//! Outbound mail: the `Mailer` seam and its SMTP implementation.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::{MailConfig, SmtpTls};
use crate::error::MailError;
use crate::survey::email::OutboundEmail;

/// Something that can deliver a rendered email.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError>;
}

/// SMTP delivery via lettre. The transport is blocking, so each send runs
/// on the blocking pool.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let relay = match config.tls() {
            SmtpTls::Implicit => SmtpTransport::relay(&config.smtp_host),
            SmtpTls::StartTls => SmtpTransport::starttls_relay(&config.smtp_host),
        };
        let mut builder = relay
            .map_err(|e| MailError::Build(format!("SMTP relay error: {e}")))?
            .port(config.smtp_port);

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        let message = build_message(email)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::SendFailed(format!("send task failed: {e}")))?
            .map_err(|e| MailError::SendFailed(e.to_string()))?;

        tracing::info!(to = %email.to, from = %email.from_name, "NPS email sent");
        Ok(())
    }
}

fn parse_address(address: &str) -> Result<Address, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Build the MIME message: `"{from_name}" <{from_address}>`, HTML body.
pub fn build_message(email: &OutboundEmail) -> Result<Message, MailError> {
    let from = Mailbox::new(
        Some(email.from_name.clone()),
        parse_address(&email.from_address)?,
    );
    let to = Mailbox::new(None, parse_address(&email.to)?);

    Message::builder()
        .from(from)
        .to(to)
        .subject(email.subject.as_str())
        .header(ContentType::TEXT_HTML)
        .body(email.html_body.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}
