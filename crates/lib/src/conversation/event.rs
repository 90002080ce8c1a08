//! Inbound events and the reply capability that travels with them.

use crate::channels::DeliveryError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Identity of one conversation: channel id + conversation id (e.g. a Telegram chat_id).
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct ConversationKey {
    pub channel_id: String,
    pub conversation_id: String,
}

impl ConversationKey {
    pub fn new(channel_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            conversation_id: conversation_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_id, self.conversation_id)
    }
}

/// Capability to answer the conversation an event came from.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Signal that a reply is being prepared (typing/presence). Default does nothing.
    async fn typing(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Deliver one reply to the conversation.
    async fn deliver(&self, text: &str) -> Result<(), DeliveryError>;
}

/// One message received from a conversation, waiting to be answered.
pub struct InboundEvent {
    pub key: ConversationKey,
    pub payload: String,
    pub reply: Arc<dyn ReplySink>,
}

impl InboundEvent {
    pub fn new(key: ConversationKey, payload: impl Into<String>, reply: Arc<dyn ReplySink>) -> Self {
        Self {
            key,
            payload: payload.into(),
            reply,
        }
    }
}

impl fmt::Debug for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundEvent")
            .field("key", &self.key)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}
