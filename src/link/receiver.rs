//! Application handle for a receiving link endpoint.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{LinkState, ReceivedMessage};
use crate::{
    error::AmqpError,
    performative::{DeliveryState, Handle, TransferNumber},
    session::{
        SessionError,
        core::{SessionCore, lock_core},
    },
};

/// Handle to a receiving link owned by a session.
///
/// Deliveries reassembled from incoming Transfer fragments arrive on an
/// internal channel; [`recv`](Self::recv) awaits them in arrival order.
pub struct ReceiverLink {
    name: String,
    session: Arc<Mutex<SessionCore>>,
    messages: mpsc::UnboundedReceiver<ReceivedMessage>,
}

impl ReceiverLink {
    pub(crate) fn new(
        name: String,
        session: Arc<Mutex<SessionCore>>,
        messages: mpsc::UnboundedReceiver<ReceivedMessage>,
    ) -> Self {
        Self {
            name,
            session,
            messages,
        }
    }

    /// Name of the link within its session.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locally assigned handle number, while the link is registered.
    #[must_use]
    pub fn handle(&self) -> Option<Handle> {
        let core = lock_core(&self.session);
        core.link(&self.name).map(|link| link.core.handle)
    }

    /// Current state of the link's attach handshake.
    #[must_use]
    pub fn state(&self) -> LinkState {
        let core = lock_core(&self.session);
        core.link(&self.name)
            .map_or(LinkState::Detached, |link| link.core.state)
    }

    /// Credit this endpoint currently extends to the sending peer.
    #[must_use]
    pub fn credit(&self) -> u32 {
        let core = lock_core(&self.session);
        core.link(&self.name)
            .map_or(0, |link| link.core.link_credit)
    }

    /// Start the attach handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LinkNotFound`] if the session no longer
    /// tracks this link, or a link error if the handshake cannot start
    /// from the current state.
    pub fn attach(&self) -> Result<(), SessionError> {
        lock_core(&self.session).attach_link(&self.name)
    }

    /// Detach the link, closing it when `closed` is set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LinkNotFound`] if the session no longer
    /// tracks this link.
    pub fn detach(&self, closed: bool, error: Option<AmqpError>) -> Result<(), SessionError> {
        lock_core(&self.session).detach_link(&self.name, closed, error)
    }

    /// Extend `credit` deliveries of credit to the sending peer.
    ///
    /// Emits a link-scoped Flow merged with the session's windows. With
    /// `drain` set, the sender is asked to exhaust the credit promptly.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LinkNotFound`] if the session no longer
    /// tracks this link, or a link error if the link is not attached.
    pub fn flow(&self, credit: u32, drain: bool) -> Result<(), SessionError> {
        lock_core(&self.session).issue_credit(&self.name, credit, drain)
    }

    /// Settle one received delivery with the given outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LinkNotFound`] if the session no longer
    /// tracks this link, or a link error if the link is not attached.
    pub fn settle(
        &self,
        delivery_id: TransferNumber,
        state: DeliveryState,
    ) -> Result<(), SessionError> {
        lock_core(&self.session).settle_delivery(&self.name, delivery_id, state)
    }

    /// Await the next reassembled delivery.
    ///
    /// Returns `None` once the link is gone and all deliveries were
    /// drained.
    pub async fn recv(&mut self) -> Option<ReceivedMessage> {
        self.messages.recv().await
    }

    /// Drain one reassembled delivery without waiting.
    pub fn try_recv(&mut self) -> Option<ReceivedMessage> {
        self.messages.try_recv().ok()
    }
}
