//! Gateway HTTP server (single port) and the inbound pump feeding the conversation serializer.

use crate::channels::{
    ChannelHandle, ChannelRegistry, ChannelReply, InboundMessage, TelegramChannel, TelegramUpdate,
};
use crate::config::{self, Config};
use crate::conversation::{ConversationKey, ConversationSerializer, InboundEvent};
use crate::responder::HttpResponder;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

const INBOUND_QUEUE_CAPACITY: usize = 64;

/// Shared state for the gateway (config, channels, serializer).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// Sender for inbound channel messages (long-poll loops, webhook POSTs). The pump task receives.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub channel_registry: Arc<ChannelRegistry>,
    pub serializer: ConversationSerializer,
    /// In-process channel connector tasks; awaited during graceful shutdown.
    pub channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

/// Hand one inbound message to the serializer with a reply sink bound to its channel conversation.
async fn dispatch_inbound(
    registry: &ChannelRegistry,
    serializer: &ConversationSerializer,
    msg: InboundMessage,
) {
    let Some(handle) = registry.get(&msg.channel_id).await else {
        log::warn!(
            "inbound: channel {} is not registered, dropping message",
            msg.channel_id
        );
        return;
    };
    let key = ConversationKey::new(msg.channel_id, msg.conversation_id.clone());
    let reply = Arc::new(ChannelReply::new(handle, msg.conversation_id));
    serializer.submit(InboundEvent::new(key, msg.text, reply));
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Starts the Telegram channel when a bot token is configured (webhook mode when
/// `channels.telegram.webhookUrl` is set, long-poll otherwise).
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) && config.channels.telegram.webhook_secret.is_none() {
        log::warn!(
            "gateway bound to {} without channels.telegram.webhookSecret; webhook requests are not verified",
            bind
        );
    }

    let responder = HttpResponder::from_config(&config);
    if responder.url().is_none() {
        log::warn!("backend url not configured (set backend.url or URL_BACKEND); every message will get the error reply");
    }
    let serializer = ConversationSerializer::with_error_reply(
        Arc::new(responder),
        config.backend.error_reply.clone(),
    );
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE_CAPACITY);
    let channel_tasks = Arc::new(RwLock::new(Vec::new()));

    let state = GatewayState {
        config: Arc::new(config.clone()),
        inbound_tx: inbound_tx.clone(),
        channel_registry: Arc::new(ChannelRegistry::new()),
        serializer,
        channel_tasks: channel_tasks.clone(),
    };

    {
        let registry = state.channel_registry.clone();
        let serializer = state.serializer.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                dispatch_inbound(&registry, &serializer, msg).await;
            }
        });
    }

    let telegram_token = config
        .channels
        .telegram
        .bot_token
        .clone()
        .filter(|t| !t.trim().is_empty());
    let webhook_url = config.channels.telegram.webhook_url.clone();
    let telegram_webhook_for_shutdown: Option<Arc<TelegramChannel>> =
        if let Some(token) = telegram_token {
            let telegram = Arc::new(TelegramChannel::new(
                Some(token),
                config.channels.telegram.api_base.clone(),
            ));
            if let Some(ref url) = webhook_url {
                let secret = config.channels.telegram.webhook_secret.as_deref();
                if let Err(e) = telegram.set_webhook(url, secret).await {
                    log::warn!("telegram set_webhook failed: {}", e);
                } else {
                    log::info!("telegram channel registered (webhook mode): {}", url);
                }
                state
                    .channel_registry
                    .register(telegram.id().to_string(), telegram.clone())
                    .await;
                Some(telegram)
            } else {
                let handle = telegram.clone().start_inbound(inbound_tx);
                state.channel_tasks.write().await.push(handle);
                state
                    .channel_registry
                    .register(telegram.id().to_string(), telegram)
                    .await;
                log::info!("telegram channel registered and getUpdates loop started");
                None
            }
        } else {
            log::info!("no telegram bot token configured; telegram channel disabled");
            None
        };

    let channel_registry = state.channel_registry.clone();
    let app = Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state);

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            channel_registry,
            channel_tasks,
            telegram_webhook_for_shutdown,
        ))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel connectors, removes the Telegram webhook if used, then awaits in-process channel tasks.
/// Conversations still queued are not awaited.
async fn shutdown_signal(
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
    telegram_webhook: Option<Arc<TelegramChannel>>,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels");

    for id in channel_registry.ids().await {
        if let Some(handle) = channel_registry.get(&id).await {
            handle.stop();
        }
    }

    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// POST /telegram/webhook: receives Telegram update JSON; verifies optional secret, pushes InboundMessage.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(inbound) = update.into_inbound("telegram") else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes), including how many conversations have queued work.
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let channels = state.channel_registry.ids().await;
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "conversations": state.serializer.active_conversations(),
        "channels": channels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::DeliveryError;
    use crate::responder::{BackendError, Responder};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Upper;

    #[async_trait]
    impl Responder for Upper {
        async fn respond(
            &self,
            _key: &ConversationKey,
            payload: &str,
        ) -> Result<String, BackendError> {
            Ok(payload.to_uppercase())
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChannelHandle for RecordingChannel {
        fn id(&self) -> &str {
            "recording"
        }

        fn stop(&self) {}

        async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn inbound_message_is_answered_on_its_channel() {
        let registry = ChannelRegistry::new();
        let channel = Arc::new(RecordingChannel::default());
        registry
            .register("recording".to_string(), channel.clone())
            .await;
        let serializer = ConversationSerializer::new(Arc::new(Upper));

        dispatch_inbound(
            &registry,
            &serializer,
            InboundMessage {
                channel_id: "recording".to_string(),
                conversation_id: "42".to_string(),
                text: "hola".to_string(),
            },
        )
        .await;

        for _ in 0..100 {
            if !channel.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            *channel.sent.lock().unwrap(),
            vec![("42".to_string(), "HOLA".to_string())]
        );
    }

    #[tokio::test]
    async fn message_for_unknown_channel_is_dropped() {
        let registry = ChannelRegistry::new();
        let serializer = ConversationSerializer::new(Arc::new(Upper));
        dispatch_inbound(
            &registry,
            &serializer,
            InboundMessage {
                channel_id: "missing".to_string(),
                conversation_id: "1".to_string(),
                text: "hi".to_string(),
            },
        )
        .await;
        assert_eq!(serializer.active_conversations(), 0);
    }
}
