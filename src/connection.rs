//! Contract between a session and the connection that hosts it.
//!
//! The connection layer owns channel allocation, frame encoding, and raw
//! I/O. Sessions only ever hand it a ready-to-encode performative for a
//! channel, or ask it to tear the connection down after an unrecoverable
//! protocol violation. Keeping the seam this narrow lets the protocol
//! state machines be driven entirely in memory under test.

use crate::{
    error::AmqpError,
    performative::{Channel, Performative, Transfer},
};

/// Connection-side services a session relies on.
///
/// `send_frame` is a fire-and-forget handoff: the connection queues the
/// performative for encoding and transmission and reports transport
/// failures through its own teardown path, not to the session that sent
/// the frame.
pub trait Connection: Send + Sync {
    /// Queue one performative for transmission on `channel`.
    fn send_frame(&self, channel: Channel, frame: Performative);

    /// Tear down the connection, citing `error` when one is available.
    fn close(&self, error: Option<AmqpError>);

    /// Largest frame the peer accepts, negotiated at connection open.
    fn remote_max_frame_size(&self) -> u32;
}

/// Outbound context threaded through session and link methods.
///
/// Bundles the connection reference with the session's channel and trace
/// settings so frame emission, traffic logging, and metrics stay in one
/// place. Holds cheap clones so it can coexist with mutable borrows of
/// the session's link registry.
pub(crate) struct FrameWriter {
    conn: std::sync::Arc<dyn Connection>,
    channel: Channel,
    network_trace: bool,
    session_name: std::sync::Arc<str>,
}

impl FrameWriter {
    pub(crate) const fn new(
        conn: std::sync::Arc<dyn Connection>,
        channel: Channel,
        network_trace: bool,
        session_name: std::sync::Arc<str>,
    ) -> Self {
        Self {
            conn,
            channel,
            network_trace,
            session_name,
        }
    }

    pub(crate) fn send(&self, frame: Performative) {
        if self.network_trace {
            tracing::debug!("[{}] -> {:?}", self.session_name, frame);
        }
        #[cfg(feature = "metrics")]
        crate::metrics::inc_frames(crate::metrics::Direction::Outbound);
        self.conn.send_frame(self.channel, frame);
    }

    /// Send a Transfer fragment, logging a payload-redacted summary.
    pub(crate) fn send_transfer(&self, frame: Transfer) {
        if self.network_trace {
            tracing::debug!(
                "[{}] -> Transfer(delivery_id={:?}, more={}, {} payload bytes)",
                self.session_name,
                frame.delivery_id,
                frame.more,
                frame.payload.len(),
            );
        }
        #[cfg(feature = "metrics")]
        crate::metrics::inc_frames(crate::metrics::Direction::Outbound);
        self.conn.send_frame(self.channel, Performative::Transfer(frame));
    }
}
