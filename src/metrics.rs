//! Metric helpers for `amqplink`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate.

use metrics::counter;

/// Name of the counter tracking processed performatives.
pub const FRAMES_PROCESSED: &str = "amqplink_frames_processed_total";
/// Name of the counter tracking session protocol violations.
pub const PROTOCOL_ERRORS_TOTAL: &str = "amqplink_protocol_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy)]
pub enum Direction {
    /// Inbound performatives received from the peer.
    Inbound,
    /// Outbound performatives handed to the connection.
    Outbound,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Record a processed performative for the given direction.
pub fn inc_frames(direction: Direction) {
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
}

/// Record a session protocol violation.
pub fn inc_protocol_errors() {
    counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
}
