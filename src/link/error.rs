//! Errors raised by link endpoints.

use thiserror::Error;

use super::state::LinkState;
use crate::performative::Role;

/// Errors produced by link attach/detach handling and delivery issuance.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The link cannot start or accept an attach handshake in its state.
    #[error("link cannot attach from state {0:?}")]
    AttachNotPermitted(LinkState),
    /// The operation requires a fully attached link.
    #[error("link is not attached, current state {0:?}")]
    NotAttached(LinkState),
    /// An incoming Attach omitted both its source and target address.
    #[error("incoming attach carries neither a source nor a target address")]
    MissingAddress,
    /// The operation is only valid for the other link role.
    #[error("operation requires a {expected:?} link, this link is a {actual:?}")]
    WrongRole {
        /// Role the operation requires.
        expected: Role,
        /// Role this link actually has.
        actual: Role,
    },
}
