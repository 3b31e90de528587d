//! The owner's pending-message queue.
//!
//! The owner keeps the [`PendingQueue`] and appends to it between polls. The
//! messenger only holds a [`WeakPendingQueue`], pops from the head when it
//! drains, and pushes back onto the head when a send is refused.

use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
};

use tokio::time::Instant;

/// Final result of a single outgoing message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::AsRefStr, strum_macros::Display,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    /// The service accepted the message.
    Acknowledged,
    /// The service settled the message with anything other than accept.
    Rejected,
    /// No settlement arrived within the send timeout.
    Timeout,
    /// The messenger stopped, failed or was destroyed while the message was in flight.
    Aborted,
    /// The codec could not encode the message, so it was never sent.
    EncodingFailed,
}

impl DeliveryOutcome {
    pub(crate) fn is_send_error(self) -> bool {
        matches!(self, DeliveryOutcome::Rejected | DeliveryOutcome::Timeout)
    }
}

pub type OutcomeCallback = Box<dyn FnOnce(DeliveryOutcome)>;

/// A message waiting to be sent, along with who to tell when it is done.
pub struct PendingMessage<M> {
    pub message: M,
    pub enqueued_at: Instant,
    on_outcome: Option<OutcomeCallback>,
}

impl<M> PendingMessage<M> {
    pub fn new(message: M, on_outcome: impl FnOnce(DeliveryOutcome) + 'static) -> Self {
        Self {
            message,
            enqueued_at: Instant::now(),
            on_outcome: Some(Box::new(on_outcome)),
        }
    }

    /// A message nobody wants to hear back about.
    pub fn fire_and_forget(message: M) -> Self {
        Self {
            message,
            enqueued_at: Instant::now(),
            on_outcome: None,
        }
    }

    pub(crate) fn into_parts(self) -> (M, Option<OutcomeCallback>) {
        (self.message, self.on_outcome)
    }

    pub(crate) fn resolve(self, outcome: DeliveryOutcome) {
        if let Some(callback) = self.on_outcome {
            callback(outcome);
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for PendingMessage<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMessage")
            .field("message", &self.message)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

type Entries<M> = RefCell<VecDeque<PendingMessage<M>>>;

/// FIFO of messages waiting for the messenger, owned by the caller.
pub struct PendingQueue<M> {
    entries: Rc<Entries<M>>,
}

impl<M> Clone for PendingQueue<M> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<M> Default for PendingQueue<M> {
    fn default() -> Self {
        Self {
            entries: Rc::new(RefCell::new(VecDeque::new())),
        }
    }
}

impl<M> PendingQueue<M> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push_back(&self, entry: PendingMessage<M>) {
        self.entries.borrow_mut().push_back(entry);
    }

    /// Enqueues `message` and registers `on_outcome` for its final result.
    pub fn enqueue(&self, message: M, on_outcome: impl FnOnce(DeliveryOutcome) + 'static) {
        self.push_back(PendingMessage::new(message, on_outcome));
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Non-owning handle for the messenger. It does not keep the queue alive.
    pub fn downgrade(&self) -> WeakPendingQueue<M> {
        WeakPendingQueue {
            entries: Rc::downgrade(&self.entries),
        }
    }
}

impl<M> fmt::Debug for PendingQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingQueue")
            .field("len", &self.len())
            .finish()
    }
}

/// Borrowed view of an owner's [`PendingQueue`].
pub struct WeakPendingQueue<M> {
    entries: Weak<Entries<M>>,
}

impl<M> Clone for WeakPendingQueue<M> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<M> WeakPendingQueue<M> {
    /// Returns the live queue, or `None` once the owner has dropped it.
    pub fn upgrade(&self) -> Option<PendingQueue<M>> {
        self.entries.upgrade().map(|entries| PendingQueue { entries })
    }
}

impl<M> fmt::Debug for WeakPendingQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPendingQueue")
            .field("alive", &(self.entries.strong_count() > 0))
            .finish()
    }
}

impl<M> PendingQueue<M> {
    pub(crate) fn pop_front(&self) -> Option<PendingMessage<M>> {
        self.entries.borrow_mut().pop_front()
    }

    pub(crate) fn push_front(&self, entry: PendingMessage<M>) {
        self.entries.borrow_mut().push_front(entry);
    }

    #[cfg(test)]
    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.entries)
    }
}
