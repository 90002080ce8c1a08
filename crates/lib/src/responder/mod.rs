//! Backend responder: one outbound call per inbound message.
//!
//! The serializer depends only on the [`Responder`] trait; [`HttpResponder`] is the
//! production implementation that POSTs to the configured backend URL.

mod http;

pub use http::{HttpResponder, DEFAULT_FALLBACK_REPLY};

use crate::conversation::ConversationKey;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend url not configured")]
    NotConfigured,
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),
}

/// Produces the reply text for one message of a conversation.
///
/// Implementations must be safe to call concurrently for different conversations and
/// must not retry internally: each message gets exactly one attempt.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, key: &ConversationKey, payload: &str) -> Result<String, BackendError>;
}
