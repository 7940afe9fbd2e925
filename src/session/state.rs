//! Session lifecycle states.

/// State of a session's Begin/End handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists on the channel.
    Unmapped,
    /// A Begin has been sent; awaiting the peer's Begin.
    BeginSent,
    /// A peer Begin arrived before a local one was sent.
    BeginRcvd,
    /// Both Begin frames have been exchanged; the session is live.
    Mapped,
    /// A peer End arrived; detaching links before replying.
    EndRcvd,
    /// An End has been sent; awaiting the peer's End.
    EndSent,
    /// The session is being torn down and discards further input.
    Discarding,
}

impl SessionState {
    /// Whether deliveries may currently be sent.
    #[must_use]
    pub const fn is_mapped(self) -> bool {
        matches!(self, Self::Mapped)
    }

    /// Whether teardown has completed or is irreversibly underway.
    #[must_use]
    pub const fn is_ending(self) -> bool {
        matches!(self, Self::EndRcvd | Self::EndSent | Self::Discarding)
    }
}
