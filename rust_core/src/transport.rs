//! Chat transport collaborator
//!
//! The engine only needs to page through a channel, react to and reply in
//! it, and send direct messages to authors. Concrete clients live in the
//! services.

use crate::error::TransportError;
use crate::models::{ChatMessage, MessageId};
use async_trait::async_trait;

/// Result of a direct message attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmResult {
    pub ok: bool,
    /// Recipient does not accept direct messages
    pub suppressed: bool,
}

impl DmResult {
    pub fn delivered() -> Self {
        Self {
            ok: true,
            suppressed: false,
        }
    }

    pub fn suppressed() -> Self {
        Self {
            ok: false,
            suppressed: true,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Messages with an id greater than `after` (or the most recent page when
    /// `after` is None), at most `limit`, in any order.
    async fn fetch_messages(
        &self,
        channel: &str,
        after: Option<&MessageId>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, TransportError>;

    async fn fetch_one(
        &self,
        channel: &str,
        id: &MessageId,
    ) -> Result<Option<ChatMessage>, TransportError>;

    async fn post_reaction(
        &self,
        channel: &str,
        id: &MessageId,
        emoji: &str,
    ) -> Result<(), TransportError>;

    async fn post_reply(&self, channel: &str, text: &str) -> Result<(), TransportError>;

    async fn send_direct_message(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<DmResult, TransportError>;

    /// Transport name for logging
    fn transport_name(&self) -> &str;
}
