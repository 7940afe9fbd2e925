//! Deliveries: one logical message handed to the session for transmission.
//!
//! A [`Delivery`] is ephemeral. A sender link creates it around a Transfer
//! performative, the session's outgoing-transfer routine consumes it,
//! fragmenting the payload across physical frames as needed, and the
//! outcome is recorded on the delivery itself rather than raised as an
//! error: flow-control refusals are ordinary results the caller retries.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::performative::{Transfer, TransferNumber};

/// Sender-assigned tag identifying a delivery on its link.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTag(Bytes);

impl DeliveryTag {
    /// Wrap raw tag bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Build a tag from a per-link counter.
    #[must_use]
    pub fn from_counter(counter: u64) -> Self {
        Self(Bytes::copy_from_slice(&counter.to_be_bytes()))
    }

    /// Return the raw tag bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeliveryTag(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Outcome of the session's attempt to transmit a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    /// The delivery has not yet been handed to the session.
    Pending,
    /// The delivery was transmitted in full.
    Okay,
    /// The remote incoming window is exhausted; retry after a flow update.
    Busy,
    /// The delivery cannot be sent in the current session state.
    Error,
}

/// One logical message on its way through the session.
#[derive(Clone, Debug)]
pub struct Delivery {
    transfer: Transfer,
    state: TransferState,
}

impl Delivery {
    /// Wrap a Transfer performative, payload included, for transmission.
    #[must_use]
    pub const fn new(transfer: Transfer) -> Self {
        Self {
            transfer,
            state: TransferState::Pending,
        }
    }

    /// Return the outcome recorded by the session.
    #[must_use]
    pub const fn state(&self) -> TransferState {
        self.state
    }

    /// Return the session-assigned delivery number, once transmitted.
    #[must_use]
    pub const fn delivery_id(&self) -> Option<TransferNumber> {
        self.transfer.delivery_id
    }

    /// Return the sender-assigned delivery tag.
    #[must_use]
    pub const fn delivery_tag(&self) -> Option<&DeliveryTag> {
        self.transfer.delivery_tag.as_ref()
    }

    /// Return the full logical payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.transfer.payload
    }

    pub(crate) const fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    pub(crate) const fn transfer_mut(&mut self) -> &mut Transfer {
        &mut self.transfer
    }

    pub(crate) const fn set_state(&mut self, state: TransferState) {
        self.state = state;
    }
}
