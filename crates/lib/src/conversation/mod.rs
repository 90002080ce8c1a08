//! Conversation core.
//!
//! Messages from one conversation are answered strictly one at a time, in arrival order,
//! while different conversations proceed concurrently. Channels hand inbound events to the
//! [`ConversationSerializer`], which calls the backend [`Responder`](crate::responder::Responder)
//! and answers through the event's [`ReplySink`].

mod event;
mod serializer;

pub use event::{ConversationKey, InboundEvent, ReplySink};
pub use serializer::{ConversationSerializer, ConversationStatus, DEFAULT_ERROR_REPLY};
