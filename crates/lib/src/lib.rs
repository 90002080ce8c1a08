//! Relay core library: per-conversation message serialization, backend responder,
//! channels, and the gateway used by the CLI.

pub mod channels;
pub mod config;
pub mod conversation;
pub mod gateway;
pub mod init;
pub mod responder;
