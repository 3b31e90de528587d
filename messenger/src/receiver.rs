use tokio::sync::{mpsc, oneshot};

use crate::{
    error::LinkError,
    sender::poll_fault,
    session::{DeliveryTag, Disposition, LinkAddress, Transfer},
};

/// Messenger side of an attached receive link (cloud-to-device).
#[derive(Debug)]
pub struct ReceiveLink {
    address: LinkAddress,
    incoming: mpsc::UnboundedReceiver<Transfer>,
    dispositions: mpsc::UnboundedSender<(DeliveryTag, Disposition)>,
    fault: oneshot::Receiver<LinkError>,
}

/// Transport side of a receive link.
#[derive(Debug)]
pub struct ReceiveLinkPeer {
    incoming: mpsc::UnboundedSender<Transfer>,
    dispositions: mpsc::UnboundedReceiver<(DeliveryTag, Disposition)>,
    fault: Option<oneshot::Sender<LinkError>>,
}

impl ReceiveLink {
    pub fn pair(address: LinkAddress) -> (ReceiveLink, ReceiveLinkPeer) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (disposition_tx, disposition_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = oneshot::channel();

        (
            ReceiveLink {
                address,
                incoming: incoming_rx,
                dispositions: disposition_tx,
                fault: fault_rx,
            },
            ReceiveLinkPeer {
                incoming: incoming_tx,
                dispositions: disposition_rx,
                fault: Some(fault_tx),
            },
        )
    }

    pub fn address(&self) -> &LinkAddress {
        &self.address
    }

    pub(crate) fn next_transfer(&mut self) -> Option<Transfer> {
        self.incoming.try_recv().ok()
    }

    pub(crate) fn settle(&self, tag: DeliveryTag, disposition: Disposition) -> Result<(), LinkError> {
        self.dispositions.send((tag, disposition)).map_err(|_| {
            LinkError::Detached(format!(
                "'{}' closed before transfer {tag} could be settled",
                self.address.name
            ))
        })
    }

    pub(crate) fn poll_fault(&mut self) -> Option<LinkError> {
        poll_fault(&mut self.fault, &self.address)
    }
}

impl ReceiveLinkPeer {
    /// Pushes a cloud-to-device transfer toward the messenger.
    pub fn deliver(&self, transfer: Transfer) -> bool {
        self.incoming.send(transfer).is_ok()
    }

    pub fn try_next_disposition(&mut self) -> Option<(DeliveryTag, Disposition)> {
        self.dispositions.try_recv().ok()
    }

    pub fn fail(&mut self, error: LinkError) {
        if let Some(fault) = self.fault.take() {
            let _ = fault.send(error);
        }
    }
}
