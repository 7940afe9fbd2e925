//! Application handle for a sending link endpoint.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{DispositionEvent, LinkState};
use crate::{
    delivery::Delivery,
    error::AmqpError,
    performative::{DeliveryState, Handle},
    session::{
        SessionError,
        core::{SessionCore, lock_core},
    },
};

/// Per-delivery options applied by [`SenderLink::send_with`].
#[derive(Clone, Debug, Default)]
pub struct SendOptions {
    /// Settle at transmission; defaults to the link's settle mode.
    pub settled: Option<bool>,
    /// Payload format code; defaults to format zero.
    pub message_format: Option<u32>,
    /// Provisional delivery state to announce with the transfer.
    pub state: Option<DeliveryState>,
}

/// Handle to a sending link owned by a session.
///
/// The handle references the endpoint; the session owns it. Once the
/// session unmaps, operations report the link as detached.
pub struct SenderLink {
    name: String,
    session: Arc<Mutex<SessionCore>>,
    outcomes: mpsc::UnboundedReceiver<DispositionEvent>,
}

impl SenderLink {
    pub(crate) fn new(
        name: String,
        session: Arc<Mutex<SessionCore>>,
        outcomes: mpsc::UnboundedReceiver<DispositionEvent>,
    ) -> Self {
        Self {
            name,
            session,
            outcomes,
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

    /// Credit currently extended by the receiving peer.
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

    /// Send one delivery with default options.
    ///
    /// The returned [`Delivery`] carries the transmission outcome: `Busy`
    /// signals flow-control backpressure to retry after a peer flow
    /// update, `Error` signals the session is not mapped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LinkNotFound`] if the session no longer
    /// tracks this link, or a link error if the link is not attached.
    pub fn send(&self, payload: Bytes) -> Result<Delivery, SessionError> {
        self.send_with(payload, SendOptions::default())
    }

    /// Send one delivery with explicit per-delivery options.
    ///
    /// # Errors
    ///
    /// Same contract as [`send`](Self::send).
    pub fn send_with(&self, payload: Bytes, options: SendOptions) -> Result<Delivery, SessionError> {
        lock_core(&self.session).send_on_link(&self.name, payload, &options)
    }

    /// Await the next settlement update for a delivery sent on this link.
    ///
    /// Returns `None` once the link is gone and all updates were drained.
    pub async fn next_outcome(&mut self) -> Option<DispositionEvent> {
        self.outcomes.recv().await
    }

    /// Drain one settlement update without waiting.
    pub fn try_next_outcome(&mut self) -> Option<DispositionEvent> {
        self.outcomes.try_recv().ok()
    }
}
