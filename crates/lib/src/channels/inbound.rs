//! Inbound message from a channel: delivered to the gateway for serialization and answering.

/// A text message received by a channel connector.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub conversation_id: String,
    pub text: String,
}
