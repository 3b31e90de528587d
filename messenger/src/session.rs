//! The session/transport collaborator, seen from the messenger.
//!
//! A [`Session`] attaches and detaches links. Every request returns a tokio
//! `oneshot` receiver that the messenger polls without blocking, so the
//! transport is free to complete it whenever it likes.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::{error::LinkError, receiver::ReceiveLink, sender::SendLink};

/// Identifies one transfer on a link, for settlement.
pub type DeliveryTag = u64;

/// Pending attach. Resolves to the attached link or the reason it failed.
pub type PendingLink<L> = oneshot::Receiver<Result<L, LinkError>>;

/// Pending detach. Any completion, including a dropped sender, means done.
pub type PendingClose = oneshot::Receiver<()>;

/// Final state of a transfer, as decided by the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    Rejected,
    /// Not processed; the sender may deliver it again.
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub tag: DeliveryTag,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Sender,
    Receiver,
}

/// Where a link attaches to, and the name it attaches under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAddress {
    pub role: LinkRole,
    pub name: String,
    pub address: String,
}

impl LinkAddress {
    pub fn new(role: LinkRole, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            role,
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Either kind of attached link, handed back to the session for detach.
#[derive(Debug)]
pub enum AnyLink {
    Send(SendLink),
    Receive(ReceiveLink),
}

impl AnyLink {
    pub fn address(&self) -> &LinkAddress {
        match self {
            AnyLink::Send(link) => link.address(),
            AnyLink::Receive(link) => link.address(),
        }
    }
}

/// Transport session that owns link attach/detach.
pub trait Session {
    fn open_send_link(&mut self, address: &LinkAddress) -> PendingLink<SendLink>;

    fn open_receive_link(&mut self, address: &LinkAddress) -> PendingLink<ReceiveLink>;

    fn close_link(&mut self, link: AnyLink) -> PendingClose;
}
