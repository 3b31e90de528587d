//! Attach and detach of the send/receive link pair.
//!
//! The manager turns the session's one-shot requests into a small phase
//! machine the messenger can poll: `Detached -> Opening -> Open -> Closing ->
//! Detached`. Failures are reported, never retried here.

use std::{mem, time::Duration};

use tokio::{sync::oneshot::error::TryRecvError, time::Instant};
use tracing::{debug, warn};

use crate::{
    error::LinkError,
    receiver::ReceiveLink,
    sender::SendLink,
    session::{AnyLink, LinkAddress, PendingClose, PendingLink, Session},
};

#[derive(Debug)]
pub(crate) enum OpenPoll {
    Pending,
    Opened,
    Failed(LinkError),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ClosePoll {
    Pending,
    Closed,
}

enum Attach<L> {
    Requested(PendingLink<L>),
    Attached(L),
}

impl<L> Attach<L> {
    /// Returns `Ok(true)` once the link is attached.
    fn poll(&mut self, address: &LinkAddress) -> Result<bool, LinkError> {
        if let Attach::Requested(request) = self {
            match request.try_recv() {
                Ok(Ok(link)) => *self = Attach::Attached(link),
                Ok(Err(error)) => return Err(error),
                Err(TryRecvError::Empty) => return Ok(false),
                Err(TryRecvError::Closed) => {
                    return Err(LinkError::AttachFailed(format!(
                        "session abandoned attach of '{}'",
                        address.name
                    )));
                }
            }
        }
        Ok(true)
    }

    fn into_link(self) -> Option<L> {
        match self {
            Attach::Attached(link) => Some(link),
            Attach::Requested(_) => None,
        }
    }
}

enum Phase {
    Detached,
    Opening {
        send: Attach<SendLink>,
        receive: Attach<ReceiveLink>,
        send_address: LinkAddress,
        receive_address: LinkAddress,
        deadline: Instant,
    },
    Open {
        send: SendLink,
        receive: ReceiveLink,
    },
    Closing {
        pending: Vec<PendingClose>,
        deadline: Instant,
    },
}

pub(crate) struct LinkManager {
    session: Box<dyn Session>,
    send_base: LinkAddress,
    receive_base: LinkAddress,
    generation: u64,
    phase: Phase,
}

impl LinkManager {
    pub(crate) fn new(
        session: Box<dyn Session>,
        send_base: LinkAddress,
        receive_base: LinkAddress,
    ) -> Self {
        Self {
            session,
            send_base,
            receive_base,
            generation: 0,
            phase: Phase::Detached,
        }
    }

    pub(crate) fn has_links(&self) -> bool {
        !matches!(self.phase, Phase::Detached)
    }

    /// Requests both links. Each attach gets a fresh link name.
    pub(crate) fn begin_open(&mut self, now: Instant, attach_timeout: Duration) {
        if self.has_links() {
            self.teardown();
        }

        self.generation += 1;
        let send_address = self.named(&self.send_base);
        let receive_address = self.named(&self.receive_base);
        debug!(
            send = %send_address.name,
            receive = %receive_address.name,
            "requesting link attach"
        );

        let send = Attach::Requested(self.session.open_send_link(&send_address));
        let receive = Attach::Requested(self.session.open_receive_link(&receive_address));
        self.phase = Phase::Opening {
            send,
            receive,
            send_address,
            receive_address,
            deadline: now + attach_timeout,
        };
    }

    pub(crate) fn poll_open(&mut self, now: Instant) -> OpenPoll {
        let attached = match &mut self.phase {
            Phase::Opening {
                send,
                receive,
                send_address,
                receive_address,
                deadline,
            } => match (send.poll(send_address), receive.poll(receive_address)) {
                (Err(error), _) | (_, Err(error)) => Err(error),
                (Ok(true), Ok(true)) => Ok(true),
                _ if now >= *deadline => Err(LinkError::AttachTimeout(format!(
                    "'{}'/'{}' not attached in time",
                    send_address.name, receive_address.name
                ))),
                _ => Ok(false),
            },
            Phase::Open { .. } => return OpenPoll::Opened,
            Phase::Detached | Phase::Closing { .. } => {
                return OpenPoll::Failed(LinkError::Detached("links are not being opened".into()));
            }
        };

        match attached {
            Ok(false) => OpenPoll::Pending,
            Ok(true) => {
                if let Phase::Opening {
                    send: Attach::Attached(send),
                    receive: Attach::Attached(receive),
                    ..
                } = mem::replace(&mut self.phase, Phase::Detached)
                {
                    debug!(send = %send.address().name, receive = %receive.address().name, "links attached");
                    self.phase = Phase::Open { send, receive };
                }
                OpenPoll::Opened
            }
            Err(error) => {
                self.teardown();
                OpenPoll::Failed(error)
            }
        }
    }

    /// Detaches whatever is attached and waits for confirmations in
    /// [`poll_close`](Self::poll_close).
    pub(crate) fn begin_close(&mut self, now: Instant, detach_timeout: Duration) {
        let pending = self
            .take_links()
            .into_iter()
            .map(|link| self.session.close_link(link))
            .collect();
        self.phase = Phase::Closing {
            pending,
            deadline: now + detach_timeout,
        };
    }

    pub(crate) fn poll_close(&mut self, now: Instant) -> ClosePoll {
        let (pending, deadline) = match &mut self.phase {
            Phase::Closing { pending, deadline } => (pending, *deadline),
            Phase::Detached => return ClosePoll::Closed,
            Phase::Opening { .. } | Phase::Open { .. } => return ClosePoll::Pending,
        };

        pending.retain_mut(|request| matches!(request.try_recv(), Err(TryRecvError::Empty)));
        if !pending.is_empty() {
            if now < deadline {
                return ClosePoll::Pending;
            }
            warn!(
                outstanding = pending.len(),
                "link detach not confirmed in time, considering links closed"
            );
        }

        self.phase = Phase::Detached;
        ClosePoll::Closed
    }

    /// Detaches everything without waiting for confirmation.
    pub(crate) fn teardown(&mut self) {
        for link in self.take_links() {
            debug!(name = %link.address().name, "tearing down link");
            drop(self.session.close_link(link));
        }
        self.phase = Phase::Detached;
    }

    /// First fault reported by either open link.
    pub(crate) fn poll_fault(&mut self) -> Option<LinkError> {
        match &mut self.phase {
            Phase::Open { send, receive } => send.poll_fault().or_else(|| receive.poll_fault()),
            _ => None,
        }
    }

    pub(crate) fn links_mut(&mut self) -> Option<(&mut SendLink, &mut ReceiveLink)> {
        match &mut self.phase {
            Phase::Open { send, receive } => Some((send, receive)),
            _ => None,
        }
    }

    fn take_links(&mut self) -> Vec<AnyLink> {
        match mem::replace(&mut self.phase, Phase::Detached) {
            Phase::Opening { send, receive, .. } => {
                let send = send.into_link().map(AnyLink::Send);
                let receive = receive.into_link().map(AnyLink::Receive);
                send.into_iter().chain(receive).collect()
            }
            Phase::Open { send, receive } => {
                vec![AnyLink::Send(send), AnyLink::Receive(receive)]
            }
            Phase::Detached | Phase::Closing { .. } => Vec::new(),
        }
    }

    fn named(&self, base: &LinkAddress) -> LinkAddress {
        LinkAddress {
            name: format!("{}-{}", base.name, self.generation),
            ..base.clone()
        }
    }
}
