//! Reply sink backed by a registered channel.

use crate::channels::{ChannelHandle, DeliveryError};
use crate::conversation::ReplySink;
use async_trait::async_trait;
use std::sync::Arc;

/// Answers one conversation through its channel handle.
pub struct ChannelReply {
    handle: Arc<dyn ChannelHandle>,
    conversation_id: String,
}

impl ChannelReply {
    pub fn new(handle: Arc<dyn ChannelHandle>, conversation_id: impl Into<String>) -> Self {
        Self {
            handle,
            conversation_id: conversation_id.into(),
        }
    }
}

#[async_trait]
impl ReplySink for ChannelReply {
    async fn typing(&self) -> Result<(), DeliveryError> {
        self.handle.send_typing(&self.conversation_id).await
    }

    async fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        self.handle.send_message(&self.conversation_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChannelHandle for RecordingChannel {
        fn id(&self) -> &str {
            "recording"
        }

        fn stop(&self) {}

        async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), DeliveryError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("message {} {}", conversation_id, text));
            Ok(())
        }

        async fn send_typing(&self, conversation_id: &str) -> Result<(), DeliveryError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("typing {}", conversation_id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn forwards_to_the_bound_conversation() {
        let channel = Arc::new(RecordingChannel::default());
        let reply = ChannelReply::new(channel.clone(), "42");
        reply.typing().await.unwrap();
        reply.deliver("hello").await.unwrap();
        assert_eq!(
            *channel.calls.lock().unwrap(),
            vec!["typing 42".to_string(), "message 42 hello".to_string()]
        );
    }
}
