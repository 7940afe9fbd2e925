//! Session configuration and wait policies.

use std::time::Duration;

use crate::performative::{Fields, Handle, TransferNumber};

/// How long a session operation should wait for its handshake to finish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately after sending the frame.
    #[default]
    No,
    /// Block until the target state is reached.
    Forever,
    /// Block up to the given duration, then fail with a timeout.
    Timeout(Duration),
}

/// Options applied when creating a session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Session name used in logs; generated from the channel when absent.
    pub name: Option<String>,
    /// Transfer number assigned to the first outgoing delivery.
    pub next_outgoing_id: TransferNumber,
    /// Number of incoming deliveries this side can buffer.
    pub incoming_window: u32,
    /// Number of outgoing deliveries this side may have in flight.
    pub outgoing_window: u32,
    /// Largest link handle number permitted on the session.
    pub handle_max: Handle,
    /// Allow using the session before the remote Begin arrives.
    pub allow_pipelined_open: bool,
    /// Extension capabilities offered to the peer.
    pub offered_capabilities: Option<Vec<String>>,
    /// Extension capabilities requested from the peer.
    pub desired_capabilities: Option<Vec<String>>,
    /// Peer-visible session properties.
    pub properties: Option<Fields>,
    /// Log per-frame traffic at debug level.
    pub network_trace: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            name: None,
            next_outgoing_id: 0,
            incoming_window: 1,
            outgoing_window: 1,
            handle_max: Handle::MAX,
            allow_pipelined_open: true,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
            network_trace: false,
        }
    }
}
