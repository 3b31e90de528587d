//! In-process [`Session`] for tests, demos and local loopback.
//!
//! Clones share state, so a test can hand one clone to the messenger and
//! drive the transport side with the other.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use tokio::sync::oneshot;

use crate::{
    error::LinkError,
    receiver::{ReceiveLink, ReceiveLinkPeer},
    sender::{SendLink, SendLinkPeer},
    session::{AnyLink, LinkAddress, PendingClose, PendingLink, Session},
};

type AttachReply<L> = oneshot::Sender<Result<L, LinkError>>;

#[derive(Default)]
struct Inner {
    auto_attach_credit: Option<usize>,
    auto_detach: bool,
    send_requests: VecDeque<(LinkAddress, AttachReply<SendLink>)>,
    receive_requests: VecDeque<(LinkAddress, AttachReply<ReceiveLink>)>,
    detach_requests: VecDeque<oneshot::Sender<()>>,
    send_peers: VecDeque<SendLinkPeer>,
    receive_peers: VecDeque<ReceiveLinkPeer>,
    attached: Vec<LinkAddress>,
    detached: Vec<LinkAddress>,
}

#[derive(Clone, Default)]
pub struct MemorySession {
    inner: Rc<RefCell<Inner>>,
}

impl MemorySession {
    /// Attaches and detaches as soon as asked, with `credit` on send links.
    pub fn auto(credit: usize) -> Self {
        let session = Self::default();
        {
            let mut inner = session.inner.borrow_mut();
            inner.auto_attach_credit = Some(credit);
            inner.auto_detach = true;
        }
        session
    }

    /// Holds every request until the test completes or fails it.
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn pending_attaches(&self) -> usize {
        let inner = self.inner.borrow();
        inner.send_requests.len() + inner.receive_requests.len()
    }

    pub fn pending_detaches(&self) -> usize {
        self.inner.borrow().detach_requests.len()
    }

    /// Attaches every requested link. Returns how many were attached.
    pub fn complete_attaches(&self, credit: usize) -> usize {
        let mut inner = self.inner.borrow_mut();
        let mut completed = 0;

        while let Some((address, reply)) = inner.send_requests.pop_front() {
            let (link, peer) = SendLink::pair(address.clone(), credit);
            if reply.send(Ok(link)).is_ok() {
                inner.send_peers.push_back(peer);
                inner.attached.push(address);
                completed += 1;
            }
        }
        while let Some((address, reply)) = inner.receive_requests.pop_front() {
            let (link, peer) = ReceiveLink::pair(address.clone());
            if reply.send(Ok(link)).is_ok() {
                inner.receive_peers.push_back(peer);
                inner.attached.push(address);
                completed += 1;
            }
        }
        completed
    }

    /// Fails every pending attach with `error`.
    pub fn fail_attaches(&self, error: LinkError) -> usize {
        let mut inner = self.inner.borrow_mut();
        let failed = inner.send_requests.len() + inner.receive_requests.len();

        for (_, reply) in inner.send_requests.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        for (_, reply) in inner.receive_requests.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        failed
    }

    pub fn complete_detaches(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        let confirmed = inner.detach_requests.len();
        for reply in inner.detach_requests.drain(..) {
            let _ = reply.send(());
        }
        confirmed
    }

    /// Transport end of the most recently attached send link.
    pub fn take_send_peer(&self) -> Option<SendLinkPeer> {
        self.inner.borrow_mut().send_peers.pop_back()
    }

    /// Transport end of the most recently attached receive link.
    pub fn take_receive_peer(&self) -> Option<ReceiveLinkPeer> {
        self.inner.borrow_mut().receive_peers.pop_back()
    }

    pub fn attached(&self) -> Vec<LinkAddress> {
        self.inner.borrow().attached.clone()
    }

    pub fn detached(&self) -> Vec<LinkAddress> {
        self.inner.borrow().detached.clone()
    }
}

impl Session for MemorySession {
    fn open_send_link(&mut self, address: &LinkAddress) -> PendingLink<SendLink> {
        let (reply, request) = oneshot::channel();
        self.inner
            .borrow_mut()
            .send_requests
            .push_back((address.clone(), reply));

        let credit = self.inner.borrow().auto_attach_credit;
        if let Some(credit) = credit {
            self.complete_attaches(credit);
        }
        request
    }

    fn open_receive_link(&mut self, address: &LinkAddress) -> PendingLink<ReceiveLink> {
        let (reply, request) = oneshot::channel();
        self.inner
            .borrow_mut()
            .receive_requests
            .push_back((address.clone(), reply));

        let credit = self.inner.borrow().auto_attach_credit;
        if let Some(credit) = credit {
            self.complete_attaches(credit);
        }
        request
    }

    fn close_link(&mut self, link: AnyLink) -> PendingClose {
        let (reply, request) = oneshot::channel();
        let mut inner = self.inner.borrow_mut();
        inner.detached.push(link.address().clone());
        drop(link);

        if inner.auto_detach {
            let _ = reply.send(());
        } else {
            inner.detach_requests.push_back(reply);
        }
        request
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemorySession")
            .field("auto_attach_credit", &inner.auto_attach_credit)
            .field("pending_attaches", &(inner.send_requests.len() + inner.receive_requests.len()))
            .field("pending_detaches", &inner.detach_requests.len())
            .field("attached", &inner.attached.len())
            .field("detached", &inner.detached.len())
            .finish()
    }
}
