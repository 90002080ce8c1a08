//! HTTP backend client: POST `{message, conversationId}`, read `respuesta` from the reply.

use crate::config::Config;
use crate::conversation::ConversationKey;
use crate::responder::{BackendError, Responder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reply used when the backend answers without a `respuesta` field.
pub const DEFAULT_FALLBACK_REPLY: &str = "Sorry, I don't have an answer for that right now.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RespondRequest<'a> {
    message: &'a str,
    conversation_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RespondResponse {
    #[serde(default)]
    respuesta: Option<String>,
}

/// Client for the backend responder endpoint.
#[derive(Clone)]
pub struct HttpResponder {
    url: Option<String>,
    timeout: Duration,
    fallback_reply: String,
    client: reqwest::Client,
}

impl HttpResponder {
    pub fn new(url: Option<String>) -> Self {
        let url = url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        Self {
            url,
            timeout: DEFAULT_TIMEOUT,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config: URL, timeout, and fallback reply.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backend.url.clone())
            .with_timeout(config.backend.timeout())
            .with_fallback_reply(config.backend.fallback_reply.clone())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fallback_reply(mut self, text: impl Into<String>) -> Self {
        self.fallback_reply = text.into();
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn post(&self, url: &str, key: &ConversationKey, payload: &str) -> Result<String, BackendError> {
        let body = RespondRequest {
            message: payload,
            conversation_id: &key.conversation_id,
        };
        let res = self.client.post(url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        let bytes = res.bytes().await?;
        Ok(extract_reply(&bytes).unwrap_or_else(|| {
            log::debug!("backend reply for {} has no usable respuesta, using fallback", key);
            self.fallback_reply.clone()
        }))
    }
}

#[async_trait]
impl Responder for HttpResponder {
    async fn respond(&self, key: &ConversationKey, payload: &str) -> Result<String, BackendError> {
        let url = self.url.as_deref().ok_or(BackendError::NotConfigured)?;
        tokio::time::timeout(self.timeout, self.post(url, key, payload))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?
    }
}

/// `respuesta` of a backend reply; `None` when absent, null, blank, or the body is not a
/// JSON object. Chat channels reject empty messages, so blank counts as no answer.
fn extract_reply(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<RespondResponse>(body)
        .ok()
        .and_then(|r| r.respuesta)
        .filter(|r| !r.trim().is_empty())
}
