//! Telegram channel: long-poll getUpdates (or webhook), sendMessage, and sendChatAction via Bot API.

use crate::channels::inbound::InboundMessage;
use crate::channels::registry::ChannelHandle;
use crate::channels::DeliveryError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;

/// Telegram's limit for one text message, in characters.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

impl TelegramUpdate {
    /// Inbound text message carried by this update, if any.
    pub fn into_inbound(self, channel_id: &str) -> Option<InboundMessage> {
        let msg = self.message?;
        let text = msg.text?;
        Some(InboundMessage {
            channel_id: channel_id.to_string(),
            conversation_id: msg.chat.id.to_string(),
            text,
        })
    }
}

/// Telegram channel connector: long-polls for updates and sends replies via sendMessage.
pub struct TelegramChannel {
    id: String,
    token: Option<String>,
    api_base: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// `api_base` defaults to the public Bot API.
    pub fn new(token: Option<String>, api_base: Option<String>) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_string());
        Self {
            id: "telegram".to_string(),
            token,
            api_base,
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> Result<String, DeliveryError> {
        let token = self
            .token
            .as_ref()
            .ok_or(DeliveryError::NotConfigured("telegram bot token"))?;
        Ok(format!("{}/bot{}/{}", self.api_base, token, method))
    }

    /// POST a Bot API method with a JSON body; non-2xx is an error.
    async fn call(&self, method: &'static str, body: &serde_json::Value) -> Result<(), DeliveryError> {
        let url = self.method_url(method)?;
        let res = self.client.post(&url).json(body).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Api {
                method,
                status,
                body,
            });
        }
        Ok(())
    }

    /// Start the getUpdates long-poll loop and forward messages to the gateway. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<InboundMessage>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }

    /// Call Telegram getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), DeliveryError> {
        let mut url = format!(
            "{}?timeout={}",
            self.method_url("getUpdates")?,
            LONG_POLL_TIMEOUT
        );
        if let Some(off) = offset {
            url.push_str(&format!("&offset={}", off));
        }
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Api {
                method: "getUpdates",
                status,
                body,
            });
        }
        let data: GetUpdatesResponse = res.json().await?;
        if !data.ok {
            return Err(DeliveryError::Unavailable(
                "getUpdates returned ok: false".to_string(),
            ));
        }
        let next_offset = data
            .result
            .iter()
            .map(|u| u.update_id)
            .max()
            .map(|id| id + 1);
        Ok((data.result, next_offset))
    }

    /// Set webhook URL (and optional secret). When set, Telegram POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), DeliveryError> {
        let mut body = serde_json::json!({ "url": url });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        self.call("setWebhook", &body).await
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), DeliveryError> {
        self.call("deleteWebhook", &serde_json::json!({})).await
    }

    /// Send a text message to a chat via sendMessage, split into several messages when it
    /// exceeds Telegram's length limit.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DeliveryError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LEN) {
            let body = serde_json::json!({ "chat_id": chat_id, "text": chunk });
            self.call("sendMessage", &body).await?;
        }
        Ok(())
    }

    /// Show the "typing…" indicator via sendChatAction.
    pub async fn send_typing(&self, chat_id: &str) -> Result<(), DeliveryError> {
        let body = serde_json::json!({ "chat_id": chat_id, "action": "typing" });
        self.call("sendChatAction", &body).await
    }
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<InboundMessage>) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                offset = next;
                for inbound in updates.into_iter().filter_map(|u| u.into_inbound(&channel.id)) {
                    if inbound_tx.send(inbound).await.is_err() {
                        log::debug!("telegram: inbound channel closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                log::debug!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ChannelHandle for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), DeliveryError> {
        TelegramChannel::send_message(self, conversation_id, text).await
    }

    async fn send_typing(&self, conversation_id: &str) -> Result<(), DeliveryError> {
        TelegramChannel::send_typing(self, conversation_id).await
    }
}

/// Split text into chunks of at most `max_chars` characters, preferring to break after a
/// newline (then a space) inside the window. Empty text yields one empty chunk.
pub fn split_message(text: &str, max_chars: usize) -> Vec<&str> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > max_chars {
        let window_end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|i| i + 1)
            .unwrap_or(window_end);
        chunks.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_text_becomes_inbound_message() {
        let update: TelegramUpdate = serde_json::from_str(
            r#"{"update_id":7,"message":{"chat":{"id":-1001},"text":"hola"}}"#,
        )
        .unwrap();
        let inbound = update.into_inbound("telegram").unwrap();
        assert_eq!(inbound.channel_id, "telegram");
        assert_eq!(inbound.conversation_id, "-1001");
        assert_eq!(inbound.text, "hola");
    }

    #[test]
    fn update_without_text_is_ignored() {
        let update: TelegramUpdate =
            serde_json::from_str(r#"{"update_id":8,"message":{"chat":{"id":1}}}"#).unwrap();
        assert!(update.into_inbound("telegram").is_none());
        let update: TelegramUpdate = serde_json::from_str(r#"{"update_id":9}"#).unwrap();
        assert!(update.into_inbound("telegram").is_none());
    }

    #[test]
    fn short_message_is_one_chunk() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
        assert_eq!(split_message("", 10), vec![""]);
    }

    #[test]
    fn long_message_breaks_at_newline_then_space() {
        assert_eq!(
            split_message("line one\nline two", 12),
            vec!["line one\n", "line two"]
        );
        assert_eq!(split_message("aaa bbb ccc", 8), vec!["aaa bbb ", "ccc"]);
    }

    #[test]
    fn unbroken_text_is_cut_on_char_boundaries() {
        let text = "ñññññ";
        let chunks = split_message(text, 2);
        assert_eq!(chunks, vec!["ññ", "ññ", "ñ"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn missing_token_is_reported_before_any_request() {
        let channel = TelegramChannel::new(None, Some("http://127.0.0.1:9/".to_string()));
        assert!(matches!(
            channel.method_url("sendMessage"),
            Err(DeliveryError::NotConfigured(_))
        ));
        let channel = TelegramChannel::new(Some("T".to_string()), Some("http://127.0.0.1:9/".to_string()));
        assert_eq!(
            channel.method_url("sendMessage").unwrap(),
            "http://127.0.0.1:9/botT/sendMessage"
        );
    }
}
