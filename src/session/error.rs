//! Errors raised by session operations.

use thiserror::Error;

use super::state::SessionState;
use crate::{link::LinkError, performative::Handle};

/// Errors produced by session handshake, link management, and waits.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// `begin` was asked not to wait while pipelined open is disallowed.
    #[error("pipelined open is disallowed; begin must wait for the remote begin")]
    PipelinedOpenDisallowed,
    /// Every handle number up to the session's maximum is assigned.
    #[error("maximum number of handles ({max}) has been reached")]
    HandleExhausted {
        /// The session's negotiated handle ceiling.
        max: Handle,
    },
    /// A bounded wait expired before the session reached the target state.
    #[error("timed out waiting for session state {expected:?}")]
    Timeout {
        /// State the wait was for.
        expected: SessionState,
    },
    /// The session was dropped while a wait was outstanding.
    #[error("session state notifications closed")]
    Terminated,
    /// A link with the same name is already registered on the session.
    #[error("link name {0:?} is already in use on this session")]
    LinkNameInUse(String),
    /// No link with the given name is registered on the session.
    #[error("no link named {0:?} on this session")]
    LinkNotFound(String),
    /// A link endpoint rejected the operation.
    #[error(transparent)]
    Link(#[from] LinkError),
}
