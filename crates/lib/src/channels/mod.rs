//! Communication channels (e.g. Telegram).
//!
//! Channel trait and registry so the gateway can start/stop channel connectors and answer
//! conversations. Inbound messages go to the gateway, which hands them to the
//! conversation serializer with a [`ChannelReply`] as their reply sink.

mod error;
mod inbound;
mod registry;
mod reply;
mod telegram;

pub use error::DeliveryError;
pub use inbound::InboundMessage;
pub use registry::{ChannelHandle, ChannelRegistry};
pub use reply::ChannelReply;
pub use telegram::{split_message, TelegramChannel, TelegramUpdate, TELEGRAM_MAX_MESSAGE_LEN};
