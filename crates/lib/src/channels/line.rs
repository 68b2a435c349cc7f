//! LINE Messaging API channel: webhook signature check, event parsing, and the reply API.

use crate::channels::{DeliveryError, InboundMessage, ReplyChannel, ReplyHandle};
use crate::config::LineSettings;
use crate::text::truncate_chars;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use std::time::Duration;

const LINE_API_BASE: &str = "https://api.line.me";
/// Platform limit for one text message.
const MAX_TEXT_CHARS: usize = 5000;

pub const LINE_SIGNATURE_HEADER: &str = "x-line-signature";

type HmacSha256 = Hmac<sha2::Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("signature is not valid base64")]
    Malformed,
    #[error("signature does not match body")]
    Mismatch,
}

/// Check `signature` (base64 HMAC-SHA256 of the raw body keyed by the channel secret).
/// Comparison is constant-time.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> Result<(), SignatureError> {
    let signature = signature.trim();
    if signature.is_empty() {
        return Err(SignatureError::Missing);
    }
    let expected = base64::engine::general_purpose::STANDARD
        .decode(signature)
        .map_err(|_| SignatureError::Malformed)?;
    let mut mac = HmacSha256::new_from_slice(channel_secret.as_bytes())
        .map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

/// Webhook POST body. Only `events` is read.
#[derive(Debug, Deserialize)]
pub struct LineWebhook {
    #[serde(default)]
    pub events: Vec<LineEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineEvent {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: Option<LineSource>,
    #[serde(default)]
    pub message: Option<LineMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSource {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LineMessage {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl LineWebhook {
    /// Text message events with a reply token and non-blank text; everything else is ignored.
    pub fn text_messages(self) -> Vec<InboundMessage> {
        self.events
            .into_iter()
            .filter(|e| e.typ == "message")
            .filter_map(|e| {
                let msg = e.message?;
                if msg.typ != "text" {
                    return None;
                }
                let text = msg.text?.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                Some(InboundMessage {
                    channel_id: "line".to_string(),
                    reply_handle: ReplyHandle(e.reply_token?),
                    text,
                    caller: e.source.and_then(|s| s.user_id),
                })
            })
            .collect()
    }
}

/// LINE reply-API client.
pub struct LineChannel {
    id: String,
    api_base: String,
    access_token: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl LineChannel {
    pub fn new(client: reqwest::Client, settings: &LineSettings) -> Self {
        Self {
            id: "line".to_string(),
            api_base: settings
                .api_base
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| LINE_API_BASE.to_string()),
            access_token: settings.access_token.clone(),
            timeout: settings.timeout,
            client,
        }
    }

    /// POST /v2/bot/message/reply with one text message.
    pub async fn reply_text(&self, reply_token: &str, text: &str) -> Result<(), DeliveryError> {
        let url = format!("{}/v2/bot/message/reply", self.api_base);
        let body = serde_json::json!({
            "replyToken": reply_token,
            "messages": [{ "type": "text", "text": truncate_chars(text, MAX_TEXT_CHARS) }],
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Api(format!("reply failed: {} {}", status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl ReplyChannel for LineChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn reply(&self, handle: ReplyHandle, text: &str) -> Result<(), DeliveryError> {
        self.reply_text(&handle.0, text).await
    }
}
