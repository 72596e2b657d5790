//! Outbound SMTP. One transport per send; the connection is closed on every
//! exit path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use super::{generate_message_id, Endpoint, MailSender, OutboundEmail, SendReceipt};

const SMTP_TIMEOUT: Duration = Duration::from_secs(20);

pub struct LettreSender;

impl LettreSender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LettreSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailSender for LettreSender {
    async fn send(&self, endpoint: &Endpoint, mail: &OutboundEmail) -> Result<SendReceipt> {
        let message_id = generate_message_id(&mail.from_addr);

        let from = Mailbox::new(
            Some(mail.from_name.clone()),
            mail.from_addr
                .parse::<Address>()
                .with_context(|| format!("invalid sender address {}", mail.from_addr))?,
        );
        let to = Mailbox::new(
            Some(mail.to_name.clone()),
            mail.to_addr
                .parse::<Address>()
                .with_context(|| format!("invalid recipient address {}", mail.to_addr))?,
        );

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject.clone())
            .message_id(Some(message_id.clone()));
        if let Some(original) = &mail.in_reply_to {
            builder = builder
                .in_reply_to(original.clone())
                .references(original.clone());
        }
        let email = builder
            .body(mail.body.clone())
            .context("failed to build message")?;

        // Strip whitespace that sneaks in from copied app passwords.
        let password: String = endpoint
            .password
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let creds = Credentials::new(endpoint.username.clone(), password);

        let tls_params = TlsParameters::new(endpoint.host.clone())
            .context("failed to build TLS parameters")?;
        let tls = if endpoint.port == 465 || endpoint.secure {
            Tls::Wrapper(tls_params)
        } else {
            Tls::Required(tls_params)
        };

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&endpoint.host)
            .context("failed to resolve SMTP relay")?
            .port(endpoint.port)
            .authentication(vec![Mechanism::Plain, Mechanism::Login])
            .credentials(creds)
            .tls(tls)
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        mailer
            .send(email)
            .await
            .with_context(|| format!("smtp send via {} failed", endpoint.host))?;

        tracing::info!(
            from = %mail.from_addr,
            to = %mail.to_addr,
            subject = %mail.subject,
            message_id = %message_id,
            "mail sent"
        );

        Ok(SendReceipt {
            message_id,
            accepted: vec![mail.to_addr.clone()],
        })
    }
}
