//! Link endpoint lifecycle states.

/// State of one link endpoint within its attach/detach handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No attach handshake is in progress.
    Detached,
    /// An Attach has been sent; awaiting the peer's Attach.
    AttachSent,
    /// A peer Attach arrived before a local one was sent.
    AttachRcvd,
    /// Both Attach frames have been exchanged.
    Attached,
    /// A Detach has been sent; awaiting the peer's Detach.
    DetachSent,
    /// A peer Detach arrived and a reciprocal Detach is being issued.
    DetachRcvd,
    /// The link failed and cannot be reused.
    Error,
}

impl LinkState {
    /// Whether the link has completed its attach handshake.
    #[must_use]
    pub const fn is_attached(self) -> bool {
        matches!(self, Self::Attached)
    }

    /// Whether the link can never carry another delivery.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Detached | Self::Error)
    }
}
