#![doc(html_root_url = "https://docs.rs/amqplink/latest")]
//! Public API for the `amqplink` library.
//!
//! This crate implements the session and link layer of AMQP 1.0:
//! connection-scoped session multiplexing, per-link credit flow control,
//! and multi-frame transfer fragmentation and reassembly. The
//! surrounding transport is abstract — anything that can deliver decoded
//! performatives and accept ready-to-encode ones hosts a [`Session`].

pub mod connection;
pub mod delivery;
pub mod error;
pub mod link;
pub mod management;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod performative;
pub mod session;
pub mod testing;

pub use connection::Connection;
pub use delivery::{Delivery, DeliveryTag, TransferState};
pub use error::{AmqpError, ErrorCondition};
pub use link::{
    DispositionEvent,
    IncomingLink,
    LinkError,
    LinkOptions,
    LinkState,
    ReceivedMessage,
    ReceiverLink,
    SendOptions,
    SenderLink,
};
pub use management::{ManagementError, ManagementLink, ManagementRequest, ManagementResponse};
pub use performative::{
    Attach,
    Begin,
    Channel,
    DeliveryState,
    Detach,
    Disposition,
    End,
    Fields,
    Flow,
    Handle,
    Performative,
    ReceiverSettleMode,
    Role,
    SenderSettleMode,
    Transfer,
    TransferNumber,
    codec::{CodecError, FRAME_HEADER_SIZE},
};
pub use session::{Session, SessionError, SessionOptions, SessionState, Wait};
