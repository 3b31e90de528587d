//! The polling orchestrator tying links, the pending queue and in-flight
//! tracking together.

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    alloc::{Allocator, SystemAllocator},
    codec::MessageCodec,
    config::{MessengerConfig, MessengerOptions},
    error::{LinkError, MessengerError, MessengerResult},
    in_flight::{InFlightTracker, SendErrorCounter},
    link::{ClosePoll, LinkManager, OpenPoll},
    queue::{DeliveryOutcome, PendingMessage, WeakPendingQueue},
    session::{DeliveryTag, Disposition, LinkAddress, LinkRole, Session, Transfer},
    state::{MessengerState, StateNotifier},
};

/// Subscriber for cloud-to-device messages. Its return value settles the
/// transfer.
pub type MessageCallback<M> = Box<dyn FnMut(M) -> Disposition>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Nothing pending and nothing in flight.
    Idle,
    Busy,
}

/// Device messenger driving one send link and one receive link.
///
/// All work happens in [`do_work`](Self::do_work), which the owner calls
/// from its event loop. The messenger never blocks, never spawns, and is
/// not `Send`: one owner drives it from one thread.
pub struct Messenger<M> {
    device_id: String,
    host_fqdn: String,
    pending_queue: WeakPendingQueue<M>,
    state: MessengerState,
    notifier: StateNotifier,
    links: LinkManager,
    in_flight: InFlightTracker<M>,
    send_errors: SendErrorCounter,
    codec: Box<dyn MessageCodec<M>>,
    subscriber: Option<MessageCallback<M>>,
    options: MessengerOptions,
    next_tag: DeliveryTag,
}

impl<M: 'static> Messenger<M> {
    /// Validates `config` and builds an idle messenger.
    ///
    /// Nothing is allocated when a required field is missing. If any
    /// allocation fails, everything built so far is released and the
    /// config's callback is dropped without being called.
    pub fn create(
        config: MessengerConfig<'_, M>,
        session: impl Session + 'static,
        codec: impl MessageCodec<M> + 'static,
    ) -> MessengerResult<Self> {
        Self::create_with(config, Box::new(session), Box::new(codec), &mut SystemAllocator)
    }

    pub(crate) fn create_with<A: Allocator>(
        config: MessengerConfig<'_, M>,
        session: Box<dyn Session>,
        codec: Box<dyn MessageCodec<M>>,
        alloc: &mut A,
    ) -> MessengerResult<Self> {
        let MessengerConfig {
            device_id,
            host_fqdn,
            pending_queue,
            on_state_changed,
            options,
        } = config;

        let device_id = device_id.ok_or_else(|| missing("device_id"))?;
        let host_fqdn = host_fqdn.ok_or_else(|| missing("host_fqdn"))?;
        let pending_queue = pending_queue.ok_or_else(|| missing("pending_queue"))?;
        validate_options(&options)?;

        let mut in_flight = InFlightTracker::new();
        in_flight.reserve(alloc, options.max_sends_per_cycle)?;
        let device_id = alloc.copy_str("device_id", device_id)?;
        let host_fqdn = alloc.copy_str("host_fqdn", host_fqdn)?;

        let send_base = LinkAddress::new(
            LinkRole::Sender,
            alloc.concat("send link name", &["link-snd-", &device_id])?,
            alloc.concat(
                "send link address",
                &["amqps://", &host_fqdn, "/devices/", &device_id, "/messages/events"],
            )?,
        );
        let receive_base = LinkAddress::new(
            LinkRole::Receiver,
            alloc.concat("receive link name", &["link-rcv-", &device_id])?,
            alloc.concat(
                "receive link address",
                &["amqps://", &host_fqdn, "/devices/", &device_id, "/messages/devicebound"],
            )?,
        );

        debug!(%device_id, %host_fqdn, "messenger created");
        Ok(Self {
            device_id,
            host_fqdn,
            pending_queue,
            state: MessengerState::Idle,
            notifier: StateNotifier::new(on_state_changed),
            links: LinkManager::new(session, send_base, receive_base),
            in_flight,
            send_errors: SendErrorCounter::default(),
            codec,
            subscriber: None,
            options,
            next_tag: 0,
        })
    }

    /// Tears the messenger down. Equivalent to dropping it.
    pub fn destroy(self) {
        debug!(device_id = %self.device_id, "destroying messenger");
    }

    pub fn state(&self) -> MessengerState {
        self.state
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn host_fqdn(&self) -> &str {
        &self.host_fqdn
    }

    pub fn options(&self) -> &MessengerOptions {
        &self.options
    }

    /// Replaces the tunables. Takes effect on the next `do_work`.
    pub fn set_options(&mut self, options: MessengerOptions) -> MessengerResult<()> {
        validate_options(&options)?;
        self.options = options;
        Ok(())
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn send_status(&self) -> SendStatus {
        let pending = self
            .pending_queue
            .upgrade()
            .is_some_and(|queue| !queue.is_empty());
        if pending || !self.in_flight.is_empty() {
            SendStatus::Busy
        } else {
            SendStatus::Idle
        }
    }

    /// Appends `message` to the owner's pending queue.
    pub fn send_async(
        &self,
        message: M,
        on_outcome: impl FnOnce(DeliveryOutcome) + 'static,
    ) -> MessengerResult<()> {
        let queue = self.pending_queue.upgrade().ok_or_else(|| {
            MessengerError::InvalidArgument("pending queue was dropped by its owner".into())
        })?;
        queue.push_back(PendingMessage::new(message, on_outcome));
        Ok(())
    }

    pub fn subscribe_for_messages(&mut self, callback: impl FnMut(M) -> Disposition + 'static) {
        self.subscriber = Some(Box::new(callback));
    }

    pub fn unsubscribe_for_messages(&mut self) {
        self.subscriber = None;
    }

    /// Requests both links. Allowed from `Idle`, and from `Error` to retry.
    pub fn start(&mut self) -> MessengerResult<()> {
        if !matches!(self.state, MessengerState::Idle | MessengerState::Error) {
            return Err(self.invalid_state("start"));
        }

        self.send_errors.reset();
        self.links
            .begin_open(Instant::now(), self.options.link_attach_timeout);
        self.transition(MessengerState::Starting);
        Ok(())
    }

    /// Aborts unsettled in-flight messages and begins detaching the links.
    /// `do_work` reports `Idle` once the detach completes.
    pub fn stop(&mut self) -> MessengerResult<()> {
        if !matches!(
            self.state,
            MessengerState::Starting | MessengerState::Started
        ) {
            return Err(self.invalid_state("stop"));
        }

        self.apply_settlements();
        let aborted = self.in_flight.abort_all();
        if aborted > 0 {
            debug!(device_id = %self.device_id, aborted, "in-flight messages aborted by stop");
        }
        self.links
            .begin_close(Instant::now(), self.options.link_detach_timeout);
        self.transition(MessengerState::Stopping);
        Ok(())
    }

    /// Runs one bounded cycle of work for the current state.
    pub fn do_work(&mut self) {
        let now = Instant::now();

        match self.state {
            MessengerState::Starting => match self.links.poll_open(now) {
                OpenPoll::Pending => {}
                OpenPoll::Opened => self.transition(MessengerState::Started),
                OpenPoll::Failed(error) => self.fail(error.into()),
            },
            MessengerState::Started => {
                if let Err(error) = self.work_started(now) {
                    self.fail(error);
                }
            }
            MessengerState::Stopping => {
                if self.links.poll_close(now) == ClosePoll::Closed {
                    self.transition(MessengerState::Idle);
                }
            }
            MessengerState::Idle | MessengerState::Error => {}
        }
    }

    fn work_started(&mut self, now: Instant) -> MessengerResult<()> {
        if let Some(fault) = self.links.poll_fault() {
            return Err(fault.into());
        }

        self.drain_pending(now)?;
        self.dispatch_incoming()?;
        self.sweep_in_flight(now)
    }

    fn drain_pending(&mut self, now: Instant) -> MessengerResult<()> {
        let Some(queue) = self.pending_queue.upgrade() else {
            return Ok(());
        };
        let Some((send, _)) = self.links.links_mut() else {
            return Ok(());
        };

        for _ in 0..self.options.max_sends_per_cycle {
            let Some(entry) = queue.pop_front() else {
                break;
            };

            let payload = match self.codec.encode(&entry.message) {
                Ok(payload) => payload,
                Err(error) => {
                    warn!(device_id = %self.device_id, %error, "dropping message that cannot be encoded");
                    entry.resolve(DeliveryOutcome::EncodingFailed);
                    continue;
                }
            };

            let tag = self.next_tag;
            match send.send(Transfer { tag, payload }) {
                Ok(()) => {
                    self.next_tag += 1;
                    debug!(device_id = %self.device_id, tag, "message handed to send link");
                    self.in_flight.insert(tag, entry, now);
                }
                Err(LinkError::NotReady(reason)) => {
                    debug!(device_id = %self.device_id, %reason, "send link not ready, draining paused");
                    queue.push_front(entry);
                    break;
                }
                Err(error) => {
                    queue.push_front(entry);
                    return Err(error.into());
                }
            }
        }
        Ok(())
    }

    fn dispatch_incoming(&mut self) -> MessengerResult<()> {
        let Some((_, receive)) = self.links.links_mut() else {
            return Ok(());
        };

        for _ in 0..self.options.max_sends_per_cycle {
            let Some(transfer) = receive.next_transfer() else {
                break;
            };

            let disposition = match self.codec.decode(transfer.payload) {
                Ok(message) => match self.subscriber.as_mut() {
                    Some(subscriber) => subscriber(message),
                    None => Disposition::Released,
                },
                Err(error) => {
                    warn!(device_id = %self.device_id, tag = transfer.tag, %error, "rejecting undecodable message");
                    Disposition::Rejected
                }
            };
            receive.settle(transfer.tag, disposition)?;
        }
        Ok(())
    }

    fn sweep_in_flight(&mut self, now: Instant) -> MessengerResult<()> {
        self.apply_settlements();

        let timed_out = self.in_flight.expire(now, self.options.send_timeout);
        self.send_errors.record_timeouts(timed_out);

        match self.send_errors.exceeds(self.options.max_send_error_count) {
            Some(count) => Err(MessengerError::TooManySendErrors(count)),
            None => Ok(()),
        }
    }

    /// Resolves every in-flight record the service has already settled.
    fn apply_settlements(&mut self) {
        let Some((send, _)) = self.links.links_mut() else {
            return;
        };
        while let Some(settlement) = send.next_settlement() {
            if let Some(outcome) = self
                .in_flight
                .settle(settlement.tag, settlement.disposition)
            {
                self.send_errors.record(outcome);
            }
        }
    }

    fn fail(&mut self, error: MessengerError) {
        warn!(device_id = %self.device_id, %error, "messenger failed");
        // Settlements that arrived before the fault still count.
        self.apply_settlements();
        self.in_flight.abort_all();
        self.links.teardown();
        self.transition(MessengerState::Error);
    }

    fn transition(&mut self, next: MessengerState) {
        self.notifier
            .transition(&self.device_id, &mut self.state, next);
    }

    fn invalid_state(&self, action: &'static str) -> MessengerError {
        MessengerError::InvalidState {
            state: self.state,
            action,
        }
    }
}

impl<M> Drop for Messenger<M> {
    fn drop(&mut self) {
        let aborted = self.in_flight.abort_all();
        if self.links.has_links() {
            self.links.teardown();
        }
        if aborted > 0 {
            debug!(device_id = %self.device_id, aborted, "in-flight messages aborted on teardown");
        }
    }
}

impl<M> std::fmt::Debug for Messenger<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("device_id", &self.device_id)
            .field("host_fqdn", &self.host_fqdn)
            .field("state", &self.state)
            .field("in_flight", &self.in_flight.len())
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

fn missing(field: &str) -> MessengerError {
    MessengerError::InvalidArgument(format!("{field} is required"))
}

fn validate_options(options: &MessengerOptions) -> MessengerResult<()> {
    if options.max_sends_per_cycle == 0 {
        return Err(MessengerError::InvalidArgument(
            "max_sends_per_cycle must be at least 1".into(),
        ));
    }
    if options.max_send_error_count == Some(0) {
        return Err(MessengerError::InvalidArgument(
            "max_send_error_count must be at least 1, or None to disable it".into(),
        ));
    }
    Ok(())
}
