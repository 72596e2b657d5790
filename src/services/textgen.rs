//! Message body generation.
//!
//! The production generator calls an OpenAI-compatible chat-completions
//! endpoint. The orchestrator only sees the [`ComposeText`] trait; a failure
//! here is fatal for the current send step.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::TextGenConfig;

#[derive(Debug, Clone)]
pub struct MailText {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait ComposeText: Send + Sync {
    /// Short introductory message, varied each call.
    async fn outbound(
        &self,
        sender_name: &str,
        recipient_name: &str,
        sender_addr: &str,
    ) -> Result<MailText>;

    /// Short reply to an original message; the subject carries a "Re: " prefix.
    async fn reply(
        &self,
        replier_name: &str,
        original_sender_name: &str,
        original_subject: &str,
        original_body: &str,
    ) -> Result<MailText>;
}

pub struct HttpTextGenerator {
    client: Client,
    base_url: String,
    model: String,
}

// -- chat-completions wire types --

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl HttpTextGenerator {
    pub fn new(config: &TextGenConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let auth: reqwest::header::HeaderValue = format!("Bearer {}", config.api_key)
            .parse()
            .context("TEXTGEN_API_KEY contains invalid header characters")?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("failed to build text generator client")?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.9,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .context("text generator request failed")?;
        if !response.status().is_success() {
            bail!("text generator returned {}", response.status());
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .context("text generator response was not valid JSON")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            bail!("text generator returned an empty completion");
        }
        Ok(content)
    }
}

#[async_trait]
impl ComposeText for HttpTextGenerator {
    async fn outbound(
        &self,
        sender_name: &str,
        recipient_name: &str,
        sender_addr: &str,
    ) -> Result<MailText> {
        let system = "You write short, casual business emails between colleagues. \
            Reply with a JSON object {\"subject\": ..., \"body\": ...} and nothing else. \
            Two to four sentences, no signatures, no placeholders.";
        let user = format!(
            "Write a brief, friendly introduction email from {sender_name} ({sender_addr}) \
             to {recipient_name}. Vary the topic; keep it unremarkable."
        );
        let content = self.chat(system, &user).await?;
        parse_mail_text(&content)
    }

    async fn reply(
        &self,
        replier_name: &str,
        original_sender_name: &str,
        original_subject: &str,
        original_body: &str,
    ) -> Result<MailText> {
        let system = "You write short, casual email replies. \
            Reply with the plain-text body only, one to three sentences, no signature.";
        let user = format!(
            "{replier_name} is replying to this email from {original_sender_name}:\n\
             Subject: {original_subject}\n\n{original_body}"
        );
        let body = self.chat(system, &user).await?;
        Ok(MailText {
            subject: reply_subject(original_subject),
            body: body.trim().to_string(),
        })
    }
}

/// `Re: ` prefix, without stacking on subjects that already carry one.
pub fn reply_subject(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.to_ascii_lowercase().starts_with("re:") {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Parse a `{subject, body}` object, tolerating markdown code fences around it.
fn parse_mail_text(raw: &str) -> Result<MailText> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let value: serde_json::Value =
        serde_json::from_str(cleaned).context("generator output was not a JSON object")?;
    let subject = value
        .get("subject")
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    let body = value
        .get("body")
        .and_then(|b| b.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    if subject.is_empty() || body.is_empty() {
        bail!("generator output was missing subject or body");
    }
    Ok(MailText { subject, body })
}
