//! Messages handed to the send link that have not been settled yet.

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    alloc::Allocator,
    error::MessengerResult,
    queue::{DeliveryOutcome, OutcomeCallback, PendingMessage},
    session::{DeliveryTag, Disposition},
};

struct InFlightRecord<M> {
    tag: DeliveryTag,
    // Held until settlement so the message has exactly one home.
    _message: M,
    sent_at: Instant,
    on_outcome: Option<OutcomeCallback>,
}

impl<M> InFlightRecord<M> {
    fn resolve(self, outcome: DeliveryOutcome) {
        if let Some(callback) = self.on_outcome {
            callback(outcome);
        }
    }
}

/// Records are kept in send order, which is also `sent_at` order.
pub(crate) struct InFlightTracker<M> {
    records: VecDeque<InFlightRecord<M>>,
}

impl<M> InFlightTracker<M> {
    pub(crate) fn new() -> Self {
        Self {
            records: VecDeque::new(),
        }
    }

    pub(crate) fn reserve<A: Allocator>(
        &mut self,
        alloc: &mut A,
        additional: usize,
    ) -> MessengerResult<()> {
        alloc.reserve("in-flight set", &mut self.records, additional)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn insert(&mut self, tag: DeliveryTag, entry: PendingMessage<M>, sent_at: Instant) {
        let (message, on_outcome) = entry.into_parts();
        self.records.push_back(InFlightRecord {
            tag,
            _message: message,
            sent_at,
            on_outcome,
        });
    }

    /// Resolves the record for `tag`. Unknown tags (already timed out or
    /// aborted) are ignored.
    pub(crate) fn settle(
        &mut self,
        tag: DeliveryTag,
        disposition: Disposition,
    ) -> Option<DeliveryOutcome> {
        let Some(index) = self.records.iter().position(|r| r.tag == tag) else {
            debug!(tag, ?disposition, "settlement for unknown delivery ignored");
            return None;
        };
        let record = self.records.remove(index)?;

        let outcome = match disposition {
            Disposition::Accepted => DeliveryOutcome::Acknowledged,
            Disposition::Rejected | Disposition::Released => DeliveryOutcome::Rejected,
        };
        debug!(tag, %outcome, "delivery settled");
        record.resolve(outcome);
        Some(outcome)
    }

    /// Resolves every record that has been in flight for longer than
    /// `timeout`. Returns how many timed out.
    pub(crate) fn expire(&mut self, now: Instant, timeout: Duration) -> usize {
        let mut expired = 0;
        while self
            .records
            .front()
            .is_some_and(|r| now.saturating_duration_since(r.sent_at) > timeout)
        {
            if let Some(record) = self.records.pop_front() {
                warn!(tag = record.tag, ?timeout, "delivery timed out");
                record.resolve(DeliveryOutcome::Timeout);
                expired += 1;
            }
        }
        expired
    }

    pub(crate) fn abort_all(&mut self) -> usize {
        let aborted = self.records.len();
        for record in self.records.drain(..) {
            record.resolve(DeliveryOutcome::Aborted);
        }
        aborted
    }
}

/// Counts consecutive failed sends; any acknowledgment resets it.
#[derive(Debug, Default)]
pub(crate) struct SendErrorCounter {
    count: u32,
}

impl SendErrorCounter {
    pub(crate) fn record(&mut self, outcome: DeliveryOutcome) {
        if outcome.is_send_error() {
            self.count = self.count.saturating_add(1);
        } else if outcome == DeliveryOutcome::Acknowledged {
            self.count = 0;
        }
    }

    pub(crate) fn record_timeouts(&mut self, timeouts: usize) {
        let timeouts = u32::try_from(timeouts).unwrap_or(u32::MAX);
        self.count = self.count.saturating_add(timeouts);
    }

    pub(crate) fn exceeds(&self, max: Option<u32>) -> Option<u32> {
        max.filter(|&max| self.count >= max).map(|_| self.count)
    }

    pub(crate) fn reset(&mut self) {
        self.count = 0;
    }
}
