//! Per-conversation serializer: one FIFO queue and one drain task per active conversation.
//!
//! All bookkeeping lives in a single map behind one mutex. The lock is held only for O(1)
//! work (append, pop, remove) and never across an `.await`, so it doubles as the
//! critical section that makes "append + start drain if idle" and "queue empty + remove
//! entry" atomic with respect to each other.

use crate::conversation::event::{ConversationKey, InboundEvent, ReplySink};
use crate::responder::Responder;
use futures_util::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

/// Reply sent to a conversation when the backend fails. Never includes error detail.
pub const DEFAULT_ERROR_REPLY: &str =
    "Sorry, we could not process your message. Please try again later.";

/// Bookkeeping for one conversation. Present only while it has undrained events.
#[derive(Default)]
struct ConversationQueue {
    events: VecDeque<InboundEvent>,
    /// Set while a drain task owns the conversation.
    busy: bool,
    /// Set while the drain task is answering a popped event.
    in_flight: bool,
}

type QueueMap = Arc<Mutex<HashMap<ConversationKey, ConversationQueue>>>;

fn lock_queues(queues: &QueueMap) -> MutexGuard<'_, HashMap<ConversationKey, ConversationQueue>> {
    queues.lock().unwrap_or_else(|e| e.into_inner())
}

/// Snapshot of a conversation that still has work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationStatus {
    /// Events waiting behind the one in flight.
    pub pending: usize,
    /// True while an event is being answered.
    pub in_flight: bool,
}

/// Serializes inbound events per conversation and answers them through the responder.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct ConversationSerializer {
    queues: QueueMap,
    responder: Arc<dyn Responder>,
    error_reply: Arc<str>,
}

impl ConversationSerializer {
    pub fn new(responder: Arc<dyn Responder>) -> Self {
        Self::with_error_reply(responder, DEFAULT_ERROR_REPLY)
    }

    /// Like [`new`](Self::new) but with a custom apology text for backend failures.
    pub fn with_error_reply(responder: Arc<dyn Responder>, error_reply: impl Into<String>) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            responder,
            error_reply: Arc::from(error_reply.into()),
        }
    }

    /// Enqueue an event for its conversation and start a drain task if none owns it.
    ///
    /// Never waits on I/O. Must be called from within a tokio runtime; otherwise the
    /// event is logged and dropped.
    pub fn submit(&self, event: InboundEvent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::error!(
                "conversation {}: submit called outside a tokio runtime, message dropped",
                event.key
            );
            return;
        };
        let key = event.key.clone();
        let start = {
            let mut queues = lock_queues(&self.queues);
            let queue = queues.entry(key.clone()).or_default();
            queue.events.push_back(event);
            log::debug!("conversation {}: queued ({} pending)", key, queue.events.len());
            !std::mem::replace(&mut queue.busy, true)
        };
        if start {
            runtime.spawn(self.clone().drain(key));
        }
    }

    /// Number of conversations with undrained events.
    pub fn active_conversations(&self) -> usize {
        lock_queues(&self.queues).len()
    }

    /// Status of a conversation, or `None` when it has nothing queued or in flight.
    pub fn status(&self, key: &ConversationKey) -> Option<ConversationStatus> {
        lock_queues(&self.queues)
            .get(key)
            .map(|q| ConversationStatus {
                pending: q.events.len(),
                in_flight: q.in_flight,
            })
    }

    async fn drain(self, key: ConversationKey) {
        let mut guard = DrainGuard {
            queues: self.queues.clone(),
            key: key.clone(),
            armed: true,
        };
        log::debug!("conversation {}: drain started", key);
        let mut handled = 0usize;
        while let Some(event) = self.next_event(&key) {
            self.process(event).await;
            handled += 1;
        }
        guard.armed = false;
        log::debug!("conversation {}: drained {} message(s)", key, handled);
    }

    /// Pop the oldest event, or remove the conversation's bookkeeping when its queue is empty.
    /// Both happen under the same lock as `submit`'s append: a racing event is either popped
    /// here or finds no entry and starts a fresh drain task.
    fn next_event(&self, key: &ConversationKey) -> Option<InboundEvent> {
        let mut queues = lock_queues(&self.queues);
        let Some(queue) = queues.get_mut(key) else {
            log::error!("conversation {}: drain task lost its queue", key);
            return None;
        };
        match queue.events.pop_front() {
            Some(event) => {
                queue.in_flight = true;
                Some(event)
            }
            None => {
                queues.remove(key);
                None
            }
        }
    }

    /// Answer one event. Failures and panics stay inside this event.
    async fn process(&self, event: InboundEvent) {
        let InboundEvent { key, payload, reply } = event;
        let answered = AssertUnwindSafe(self.answer(&key, &payload, reply.as_ref()))
            .catch_unwind()
            .await;
        if answered.is_err() {
            log::error!(
                "conversation {}: panic while answering message, continuing with the next one",
                key
            );
        }
    }

    async fn answer(&self, key: &ConversationKey, payload: &str, reply: &dyn ReplySink) {
        if let Err(e) = reply.typing().await {
            log::warn!(
                "conversation {}: typing signal failed, skipping message: {}",
                key,
                e
            );
            return;
        }
        let text = match self.responder.respond(key, payload).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("conversation {}: backend failed: {}", key, e);
                self.error_reply.to_string()
            }
        };
        if let Err(e) = reply.deliver(&text).await {
            log::warn!("conversation {}: reply delivery failed: {}", key, e);
        }
    }
}

/// Releases a conversation if its drain task is dropped before finishing (runtime shutdown,
/// abort), so a later `submit` starts a new drain task instead of queueing forever.
struct DrainGuard {
    queues: QueueMap,
    key: ConversationKey,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(queue) = lock_queues(&self.queues).remove(&self.key) {
            log::warn!(
                "conversation {}: drain task stopped early, discarded {} queued message(s)",
                self.key,
                queue.events.len()
            );
        }
    }
}
