//! Transaction-ordered dispatch of incoming messages.
//!
//! Each transaction id owns a FIFO. The first arrival for an id creates the
//! queue and submits one drain task to the worker pool; later arrivals only
//! append. A drain task removes the queue when it finds it empty, under the
//! same lock that arrivals take, so at most one task drains a given id and
//! messages of one transaction reach their endpoint in arrival order.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use spacebus_message::{errors, BodyPart, Element, Message, MessageBody, MessageHeader};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::pool::WorkerPool;

/// Where drained messages go.
pub trait MessageHandler: Send + Sync + 'static {
    /// Find the target endpoint and hand the message to its listener.
    fn route_and_deliver(&self, message: Message) -> Result<()>;

    /// Transmit a synthesized error reply. Called at most once per failure.
    fn send_error_reply(&self, reply: Message) -> Result<()>;
}

/// Error message answering `header` at its next stage.
pub fn error_reply(header: &MessageHeader, number: u32, info: impl Into<String>) -> Message {
    let reply = header.reply(header.interaction_stage.saturating_add(1), true);
    Message::new(
        reply,
        MessageBody::Error {
            number,
            extra: BodyPart::Decoded(Element::String(info.into())),
        },
    )
}

/// Whether a failure handling `header` deserves an error reply.
pub fn wants_error_reply(header: &MessageHeader) -> bool {
    !header.is_error_message
        && header
            .interaction_type
            .expects_reply(header.interaction_stage)
}

struct Shared {
    queues: Mutex<HashMap<u64, VecDeque<Message>>>,
    pool: WorkerPool,
    handler: Weak<dyn MessageHandler>,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, handler: Weak<dyn MessageHandler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(HashMap::new()),
                pool,
                handler,
            }),
        }
    }

    /// Queue `message` behind earlier messages of its transaction.
    pub fn dispatch(&self, message: Message) -> Result<()> {
        let transaction_id = message.header.transaction_id;
        {
            let mut queues = self.shared.queues.lock();
            match queues.entry(transaction_id) {
                Entry::Occupied(mut queue) => {
                    queue.get_mut().push_back(message);
                    trace!(transaction_id, "appended to draining transaction");
                    return Ok(());
                }
                Entry::Vacant(slot) => {
                    slot.insert(VecDeque::from([message]));
                }
            }
        }

        let shared = Arc::clone(&self.shared);
        if let Err(err) = self
            .shared
            .pool
            .submit(move || shared.drain(transaction_id))
        {
            // Arrivals that slipped in after the insert were accepted with Ok.
            if let Some(queue) = self.shared.queues.lock().remove(&transaction_id) {
                warn!(
                    transaction_id,
                    dropped = queue.len(),
                    error = %err,
                    "worker pool rejected transaction, dropping its queue"
                );
            }
            return Err(err);
        }
        Ok(())
    }

    /// Transactions with queued or in-progress messages.
    pub fn active_transactions(&self) -> usize {
        self.shared.queues.lock().len()
    }
}

impl Shared {
    fn drain(&self, transaction_id: u64) {
        loop {
            let message = {
                let mut queues = self.queues.lock();
                match queues.get_mut(&transaction_id).and_then(VecDeque::pop_front) {
                    Some(message) => message,
                    None => {
                        queues.remove(&transaction_id);
                        return;
                    }
                }
            };
            self.process(message);
        }
    }

    fn process(&self, message: Message) {
        let Some(handler) = self.handler.upgrade() else {
            debug!(
                transaction_id = message.header.transaction_id,
                "transport gone, dropping message"
            );
            return;
        };

        let header = message.header.clone();
        let (number, info) =
            match catch_unwind(AssertUnwindSafe(|| handler.route_and_deliver(message))) {
                Ok(Ok(())) => return,
                Ok(Err(err)) => (err.error_number(), err.to_string()),
                Err(_) => (errors::INTERNAL, "delivery panicked".to_string()),
            };

        warn!(
            transaction_id = header.transaction_id,
            uri_to = %header.uri_to,
            error = %info,
            "message delivery failed"
        );
        if !wants_error_reply(&header) {
            return;
        }
        if let Err(err) = handler.send_error_reply(error_reply(&header, number, info)) {
            warn!(
                transaction_id = header.transaction_id,
                error = %err,
                "error reply could not be sent"
            );
        }
    }
}
