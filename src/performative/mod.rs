//! Typed AMQP performatives exchanged between session peers.
//!
//! Each performative is a named-field struct, decoded once at the transport
//! boundary and matched on by tag thereafter. The [`Performative`] enum is
//! the unit of exchange between a session and its connection: the connection
//! hands decoded performatives in, and receives ready-to-encode
//! performatives back.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{delivery::DeliveryTag, error::AmqpError};

pub mod codec;

/// Map of peer-defined properties attached to Begin and Attach frames.
pub type Fields = std::collections::BTreeMap<String, String>;

/// Channel number identifying a session on its connection.
pub type Channel = u16;

/// Handle number identifying a link within a session.
pub type Handle = u32;

/// Serial number identifying one delivery within a session.
pub type TransferNumber = u32;

/// Role of a link endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The endpoint produces deliveries.
    Sender,
    /// The endpoint consumes deliveries.
    Receiver,
}

impl Role {
    /// Return the role of the peer endpoint on the same link.
    #[must_use]
    pub const fn peer(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }
}

/// Settlement policy advertised by a sending endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderSettleMode {
    /// Deliveries are sent unsettled and settled via disposition.
    #[default]
    Unsettled,
    /// Deliveries are settled at the point of transmission.
    Settled,
    /// Either policy may be applied per delivery.
    Mixed,
}

/// Settlement policy advertised by a receiving endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiverSettleMode {
    /// The receiver settles as soon as it processes a delivery.
    #[default]
    First,
    /// The receiver settles only after the sender settles.
    Second,
}

/// Terminal and intermediate outcomes attached to transfers and dispositions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DeliveryState {
    /// The delivery was accepted by the receiving application.
    Accepted,
    /// The delivery was rejected and will not be redelivered here.
    Rejected {
        /// Reason supplied by the rejecting peer.
        error: Option<AmqpError>,
    },
    /// The delivery was released back to the sender.
    Released,
    /// The delivery was modified by the receiver before release.
    Modified {
        /// The delivery counts as a failed attempt.
        delivery_failed: bool,
        /// The delivery must not be redelivered on this link.
        undeliverable_here: bool,
    },
}

/// Opens a session on a connection channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Begin {
    /// Channel on which the peer's session sends, echoed when responding.
    pub remote_channel: Option<Channel>,
    /// Transfer number of the first delivery the sender will send.
    pub next_outgoing_id: TransferNumber,
    /// Number of incoming deliveries the sender can buffer.
    pub incoming_window: u32,
    /// Number of outgoing deliveries the sender may have in flight.
    pub outgoing_window: u32,
    /// Largest link handle number that may be used on the session.
    pub handle_max: Handle,
    /// Extension capabilities the sender supports.
    pub offered_capabilities: Option<Vec<String>>,
    /// Extension capabilities the sender may use if the peer supports them.
    pub desired_capabilities: Option<Vec<String>>,
    /// Peer-defined session properties.
    pub properties: Option<Fields>,
}

/// Closes a session, optionally reporting the reason.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct End {
    /// Error that forced the session to end, if any.
    pub error: Option<AmqpError>,
}

/// Attaches a link endpoint to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attach {
    /// Name uniquely identifying the link within the session.
    pub name: String,
    /// Handle the sending endpoint assigned to the link.
    pub handle: Handle,
    /// Role of the endpoint that sent this frame.
    pub role: Role,
    /// Settlement policy of the sending endpoint.
    pub snd_settle_mode: SenderSettleMode,
    /// Settlement policy of the receiving endpoint.
    pub rcv_settle_mode: ReceiverSettleMode,
    /// Address messages on this link originate from.
    pub source: Option<String>,
    /// Address messages on this link are sent to.
    pub target: Option<String>,
    /// Sender's delivery count at the moment of attaching.
    pub initial_delivery_count: Option<u32>,
    /// Largest message the endpoint accepts, in bytes.
    pub max_message_size: Option<u64>,
    /// Extension capabilities the endpoint supports.
    pub offered_capabilities: Option<Vec<String>>,
    /// Extension capabilities the endpoint may use if the peer supports them.
    pub desired_capabilities: Option<Vec<String>>,
    /// Peer-defined link properties.
    pub properties: Option<Fields>,
}

/// Detaches a link endpoint from a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detach {
    /// Handle of the link being detached.
    pub handle: Handle,
    /// Whether the link is being closed rather than suspended.
    pub closed: bool,
    /// Error that forced the detach, if any.
    pub error: Option<AmqpError>,
}

/// Updates session and link flow-control state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// Transfer number the sender expects to receive next.
    pub next_incoming_id: Option<TransferNumber>,
    /// Sender's current incoming window.
    pub incoming_window: u32,
    /// Transfer number the sender will assign to its next delivery.
    pub next_outgoing_id: TransferNumber,
    /// Sender's current outgoing window.
    pub outgoing_window: u32,
    /// Link this update applies to; absent for session-wide updates.
    pub handle: Option<Handle>,
    /// Delivery count of the link endpoint sending this frame.
    pub delivery_count: Option<u32>,
    /// Credit the link endpoint currently extends.
    pub link_credit: Option<u32>,
    /// Deliveries the sender could send if it had credit.
    pub available: Option<u32>,
    /// The receiver asks the sender to exhaust its credit.
    pub drain: bool,
    /// The peer is asked to reply with its own flow state.
    pub echo: bool,
    /// Peer-defined properties.
    pub properties: Option<Fields>,
}

/// Carries one fragment of a delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// Handle of the link the delivery travels on.
    pub handle: Handle,
    /// Session-assigned delivery number, set on the first fragment.
    pub delivery_id: Option<TransferNumber>,
    /// Sender-assigned tag identifying the delivery on the link.
    pub delivery_tag: Option<DeliveryTag>,
    /// Format code describing the payload encoding.
    pub message_format: Option<u32>,
    /// Whether the sender considers the delivery settled.
    pub settled: Option<bool>,
    /// Further fragments of the same delivery follow.
    pub more: bool,
    /// Settlement policy override for this delivery.
    pub rcv_settle_mode: Option<ReceiverSettleMode>,
    /// Provisional delivery state communicated by the sender.
    pub state: Option<DeliveryState>,
    /// The delivery resumes an interrupted transfer.
    pub resume: bool,
    /// The delivery is aborted and its fragments must be discarded.
    pub aborted: bool,
    /// The delivery may be batched with adjacent settlement updates.
    pub batchable: bool,
    /// Fragment payload bytes.
    pub payload: Bytes,
}

/// Communicates settlement state for a contiguous range of deliveries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Disposition {
    /// Role of the endpoint sending the disposition.
    pub role: Role,
    /// First delivery number the disposition applies to.
    pub first: TransferNumber,
    /// Last delivery number the disposition applies to; defaults to `first`.
    pub last: Option<TransferNumber>,
    /// Whether the referenced deliveries are settled.
    pub settled: bool,
    /// Outcome applied to the referenced deliveries.
    pub state: Option<DeliveryState>,
    /// The disposition may be batched with adjacent updates.
    pub batchable: bool,
}

/// One decoded AMQP performative, tagged by frame type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Performative {
    /// Session open.
    Begin(Begin),
    /// Session close.
    End(End),
    /// Link attach.
    Attach(Attach),
    /// Link detach.
    Detach(Detach),
    /// Flow-control update.
    Flow(Flow),
    /// Delivery fragment.
    Transfer(Transfer),
    /// Settlement update.
    Disposition(Disposition),
}

impl Performative {
    /// Return the frame-type name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Begin(_) => "Begin",
            Self::End(_) => "End",
            Self::Attach(_) => "Attach",
            Self::Detach(_) => "Detach",
            Self::Flow(_) => "Flow",
            Self::Transfer(_) => "Transfer",
            Self::Disposition(_) => "Disposition",
        }
    }
}
