#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use messenger::{
    DeliveryOutcome, MemorySession, Messenger, MessengerConfig, MessengerOptions, MessengerState,
    PendingQueue, ReceiveLinkPeer, SendLinkPeer, Utf8Codec,
};

pub const DEVICE_ID: &str = "device-7";
pub const HOST: &str = "hub.example.net";

/// Everything the owner observes, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    State(MessengerState, MessengerState),
    Outcome(String, DeliveryOutcome),
}

pub type Log = Rc<RefCell<Vec<Event>>>;

pub struct Harness {
    pub messenger: Messenger<String>,
    pub session: MemorySession,
    pub queue: PendingQueue<String>,
    pub log: Log,
}

impl Harness {
    pub fn new(session: MemorySession, options: MessengerOptions) -> Self {
        let queue = PendingQueue::new();
        let log = Log::default();
        let states = log.clone();

        let config = MessengerConfig::new(DEVICE_ID, HOST, &queue)
            .with_options(options)
            .with_state_callback(move |previous, new| {
                states.borrow_mut().push(Event::State(previous, new))
            });
        let messenger =
            Messenger::create(config, session.clone(), Utf8Codec).expect("valid config");

        Self {
            messenger,
            session,
            queue,
            log,
        }
    }

    /// Starts over an auto-attaching session and returns the transport ends.
    pub fn started(options: MessengerOptions) -> (Self, SendLinkPeer, ReceiveLinkPeer) {
        Self::started_with_credit(8, options)
    }

    pub fn started_with_credit(
        credit: usize,
        options: MessengerOptions,
    ) -> (Self, SendLinkPeer, ReceiveLinkPeer) {
        let mut harness = Self::new(MemorySession::auto(credit), options);
        harness.messenger.start().expect("idle messenger starts");
        harness.messenger.do_work();
        assert_eq!(harness.messenger.state(), MessengerState::Started);

        let send = harness.session.take_send_peer().expect("send link attached");
        let receive = harness
            .session
            .take_receive_peer()
            .expect("receive link attached");
        (harness, send, receive)
    }

    pub fn enqueue(&self, body: &str) {
        let log = self.log.clone();
        let name = body.to_string();
        self.queue.enqueue(body.to_string(), move |outcome| {
            log.borrow_mut().push(Event::Outcome(name, outcome))
        });
    }

    pub fn states(&self) -> Vec<(MessengerState, MessengerState)> {
        self.log
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::State(previous, new) => Some((*previous, *new)),
                Event::Outcome(..) => None,
            })
            .collect()
    }

    pub fn outcomes(&self) -> Vec<(String, DeliveryOutcome)> {
        self.log
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::Outcome(name, outcome) => Some((name.clone(), *outcome)),
                Event::State(..) => None,
            })
            .collect()
    }
}

/// Payloads the service has received so far, as text.
pub fn drain_transfers(peer: &mut SendLinkPeer) -> Vec<(u64, String)> {
    std::iter::from_fn(|| peer.try_next_transfer())
        .map(|t| (t.tag, String::from_utf8_lossy(&t.payload).into_owned()))
        .collect()
}
