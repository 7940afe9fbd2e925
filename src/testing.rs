//! In-memory connection doubles for exercising session state machines.
//!
//! [`MockConnection`] records every performative a session hands it and
//! exposes the negotiated maximum frame size as plain data, so unit and
//! integration tests can drive a full session without any transport.

use std::sync::Mutex;

use crate::{
    connection::Connection,
    error::AmqpError,
    performative::{
        Channel,
        Performative,
        Transfer,
        codec::{self, FRAME_HEADER_SIZE},
    },
};

/// A connection double that records outbound traffic.
pub struct MockConnection {
    frames: Mutex<Vec<(Channel, Performative)>>,
    closed: Mutex<Option<Option<AmqpError>>>,
    max_frame_size: u32,
}

impl MockConnection {
    /// Create a mock advertising the given remote maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
            max_frame_size,
        }
    }

    /// All performatives sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<(Channel, Performative)> {
        self.frames.lock().expect("mock frame log poisoned").clone()
    }

    /// Drain and return the recorded performatives.
    #[must_use]
    pub fn take_sent(&self) -> Vec<(Channel, Performative)> {
        std::mem::take(&mut *self.frames.lock().expect("mock frame log poisoned"))
    }

    /// Whether `close` was called, and the error it cited.
    #[must_use]
    pub fn close_reason(&self) -> Option<Option<AmqpError>> {
        self.closed.lock().expect("mock close log poisoned").clone()
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::with_max_frame_size(65_536)
    }
}

impl Connection for MockConnection {
    fn send_frame(&self, channel: Channel, frame: Performative) {
        self.frames
            .lock()
            .expect("mock frame log poisoned")
            .push((channel, frame));
    }

    fn close(&self, error: Option<AmqpError>) {
        *self.closed.lock().expect("mock close log poisoned") = Some(error);
    }

    fn remote_max_frame_size(&self) -> u32 {
        self.max_frame_size
    }
}

/// Compute the remote max frame size that yields exactly
/// `available_frame_size` payload bytes per physical frame for transfers
/// shaped like `sample`.
///
/// The session measures overhead by encoding the delivery's Transfer
/// performative with an empty payload; this helper applies the same
/// measurement so tests can pick frame sizes that split payloads at
/// known boundaries.
///
/// # Panics
///
/// Panics if the sample transfer cannot be encoded or the resulting
/// size does not fit in a `u32`.
#[must_use]
pub fn max_frame_size_for(available_frame_size: usize, sample: &Transfer) -> u32 {
    let mut probe = sample.clone();
    probe.payload = bytes::Bytes::new();
    let overhead = codec::encoded_len(&Performative::Transfer(probe)).expect("encode sample");
    u32::try_from(overhead + FRAME_HEADER_SIZE + available_frame_size).expect("frame size fits u32")
}
