use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};

use crate::{
    error::LinkError,
    session::{DeliveryTag, Disposition, LinkAddress, Transfer},
};

/// A settlement reported by the service for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub tag: DeliveryTag,
    pub disposition: Disposition,
}

/// Messenger side of an attached send link.
///
/// Transfers go out through a bounded channel whose capacity is the link
/// credit; a full channel is a synchronous "not ready" refusal.
#[derive(Debug)]
pub struct SendLink {
    address: LinkAddress,
    transfers: mpsc::Sender<Transfer>,
    settlements: mpsc::UnboundedReceiver<Settlement>,
    fault: oneshot::Receiver<LinkError>,
}

/// Transport side of a send link.
#[derive(Debug)]
pub struct SendLinkPeer {
    transfers: mpsc::Receiver<Transfer>,
    settlements: mpsc::UnboundedSender<Settlement>,
    fault: Option<oneshot::Sender<LinkError>>,
}

impl SendLink {
    /// Creates both ends of a send link with `credit` outstanding transfers.
    pub fn pair(address: LinkAddress, credit: usize) -> (SendLink, SendLinkPeer) {
        let (transfer_tx, transfer_rx) = mpsc::channel(credit.max(1));
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = oneshot::channel();

        (
            SendLink {
                address,
                transfers: transfer_tx,
                settlements: settle_rx,
                fault: fault_rx,
            },
            SendLinkPeer {
                transfers: transfer_rx,
                settlements: settle_tx,
                fault: Some(fault_tx),
            },
        )
    }

    pub fn address(&self) -> &LinkAddress {
        &self.address
    }

    pub(crate) fn send(&self, transfer: Transfer) -> Result<(), LinkError> {
        self.transfers.try_send(transfer).map_err(|e| match e {
            TrySendError::Full(t) => LinkError::NotReady(format!(
                "no credit left on '{}' for transfer {}",
                self.address.name, t.tag
            )),
            TrySendError::Closed(t) => LinkError::Detached(format!(
                "'{}' closed before transfer {} could be sent",
                self.address.name, t.tag
            )),
        })
    }

    pub(crate) fn next_settlement(&mut self) -> Option<Settlement> {
        self.settlements.try_recv().ok()
    }

    /// Returns the fault reported by the transport, if any.
    ///
    /// A peer that disappears without reporting is treated as detached.
    pub(crate) fn poll_fault(&mut self) -> Option<LinkError> {
        poll_fault(&mut self.fault, &self.address)
    }
}

impl SendLinkPeer {
    /// Takes the next transfer, freeing one unit of credit.
    pub fn try_next_transfer(&mut self) -> Option<Transfer> {
        self.transfers.try_recv().ok()
    }

    pub fn settle(&self, tag: DeliveryTag, disposition: Disposition) -> bool {
        self.settlements
            .send(Settlement { tag, disposition })
            .is_ok()
    }

    /// Reports an asynchronous link failure. Only the first report counts.
    pub fn fail(&mut self, error: LinkError) {
        if let Some(fault) = self.fault.take() {
            let _ = fault.send(error);
        }
    }
}

pub(crate) fn poll_fault(
    fault: &mut oneshot::Receiver<LinkError>,
    address: &LinkAddress,
) -> Option<LinkError> {
    match fault.try_recv() {
        Ok(error) => Some(error),
        Err(oneshot::error::TryRecvError::Empty) => None,
        Err(oneshot::error::TryRecvError::Closed) => Some(LinkError::Detached(format!(
            "transport dropped '{}'",
            address.name
        ))),
    }
}
