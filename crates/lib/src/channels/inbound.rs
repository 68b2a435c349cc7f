//! Inbound message from a channel: handed to the dispatch pool for an out-of-band answer.

/// Single-use token that authorizes one reply to one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHandle(pub String);

/// A text message from a channel, to be answered through its reply handle.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub reply_handle: ReplyHandle,
    pub text: String,
    /// Platform user id, for logging only.
    pub caller: Option<String>,
}
