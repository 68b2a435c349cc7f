//! Messaging channels (LINE).
//!
//! A channel verifies and parses its webhook payloads into [`InboundMessage`]s and delivers
//! answers back through [`ReplyChannel`].

mod inbound;
mod line;

use async_trait::async_trait;

pub use inbound::{InboundMessage, ReplyHandle};
pub use line::{verify_signature, LineChannel, LineEvent, LineWebhook, SignatureError, LINE_SIGNATURE_HEADER};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("delivery rejected: {0}")]
    Api(String),
}

/// Delivers an answer to the conversation behind a reply handle. The handle is consumed.
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    /// Channel id (e.g. "line").
    fn id(&self) -> &str;
    async fn reply(&self, handle: ReplyHandle, text: &str) -> Result<(), DeliveryError>;
}
