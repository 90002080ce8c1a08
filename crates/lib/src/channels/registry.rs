//! Channel registry: register and lookup channels by id.

use crate::channels::DeliveryError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle to a running channel (stop, send message, typing).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Send a text message to a conversation (e.g. Telegram chat_id).
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), DeliveryError>;
    /// Show a typing/presence indicator in the conversation. Default does nothing.
    async fn send_typing(&self, _conversation_id: &str) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Registry of channel ids to handles. Shared across gateway.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handle; an existing handle with the same id is stopped and replaced.
    pub async fn register(&self, id: String, handle: Arc<dyn ChannelHandle>) {
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(id, handle) {
            old.stop();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ChannelHandle>> {
        let g = self.inner.read().await;
        g.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let g = self.inner.read().await;
        let mut ids: Vec<String> = g.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubChannel {
        stopped: AtomicBool,
    }

    #[async_trait]
    impl ChannelHandle for StubChannel {
        fn id(&self) -> &str {
            "stub"
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        async fn send_message(&self, _conversation_id: &str, _text: &str) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn register_replaces_and_stops_previous_handle() {
        let registry = ChannelRegistry::new();
        let first = Arc::new(StubChannel {
            stopped: AtomicBool::new(false),
        });
        let second = Arc::new(StubChannel {
            stopped: AtomicBool::new(false),
        });
        registry.register("stub".to_string(), first.clone()).await;
        registry.register("stub".to_string(), second.clone()).await;

        assert!(first.stopped.load(Ordering::SeqCst));
        assert!(!second.stopped.load(Ordering::SeqCst));
        assert_eq!(registry.ids().await, vec!["stub".to_string()]);
        assert!(registry.get("stub").await.is_some());
        assert!(registry.get("other").await.is_none());
    }

    #[tokio::test]
    async fn default_typing_is_a_no_op() {
        let stub = StubChannel {
            stopped: AtomicBool::new(false),
        };
        assert!(stub.send_typing("1").await.is_ok());
    }
}
