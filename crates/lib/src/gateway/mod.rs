//! Gateway: HTTP server and inbound pump.
//!
//! Channel connectors push [`InboundMessage`](crate::channels::InboundMessage)s into the
//! pump, which submits them to the conversation serializer. The HTTP side serves a health
//! probe and the Telegram webhook.

mod server;

pub use server::{run_gateway, GatewayState};
