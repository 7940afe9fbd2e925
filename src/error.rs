//! Wire-level AMQP error values.
//!
//! [`AmqpError`] is the error record a peer attaches to End, Detach, and
//! connection Close performatives. It travels on the wire, so it is kept
//! separate from the crate's API error enums, which live next to the
//! modules that raise them.

use serde::{Deserialize, Serialize};

use crate::performative::Fields;

/// Symbolic error conditions defined by the AMQP specification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCondition {
    /// An unexpected internal failure.
    InternalError,
    /// The peer attempted an operation that is not allowed.
    NotAllowed,
    /// The peer sent a frame that is not permitted in the current state.
    IllegalState,
    /// The link endpoint was forcibly detached.
    LinkDetachForced,
    /// The link endpoint exceeded its transfer limit.
    LinkTransferLimitExceeded,
    /// A frame referenced a handle with no attached link.
    SessionUnattachedHandle,
    /// A handle was attached that is already in use.
    SessionHandleInUse,
    /// A transfer violated the session's flow-control window.
    SessionWindowViolation,
    /// A link produced frames inconsistent with the session state.
    SessionErrantLink,
}

impl ErrorCondition {
    /// Return the wire symbol for this condition.
    #[must_use]
    pub const fn as_symbol(self) -> &'static str {
        match self {
            Self::InternalError => "amqp:internal-error",
            Self::NotAllowed => "amqp:not-allowed",
            Self::IllegalState => "amqp:illegal-state",
            Self::LinkDetachForced => "amqp:link:detach-forced",
            Self::LinkTransferLimitExceeded => "amqp:link:transfer-limit-exceeded",
            Self::SessionUnattachedHandle => "amqp:session:unattached-handle",
            Self::SessionHandleInUse => "amqp:session:handle-in-use",
            Self::SessionWindowViolation => "amqp:session:window-violation",
            Self::SessionErrantLink => "amqp:session:errant-link",
        }
    }
}

impl std::fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_symbol())
    }
}

/// An AMQP error record carried inside End, Detach, and Close frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmqpError {
    /// Symbolic condition identifying the class of error.
    pub condition: ErrorCondition,
    /// Human-readable description supplementing the condition.
    pub description: Option<String>,
    /// Peer-defined supplementary information.
    pub info: Option<Fields>,
}

impl AmqpError {
    /// Create an error carrying only a condition.
    #[must_use]
    pub const fn new(condition: ErrorCondition) -> Self {
        Self {
            condition,
            description: None,
            info: None,
        }
    }

    /// Attach a human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach supplementary peer-defined information.
    #[must_use]
    pub fn with_info(mut self, info: Fields) -> Self {
        self.info = Some(info);
        self
    }
}

impl std::fmt::Display for AmqpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.condition),
            None => write!(f, "{}", self.condition),
        }
    }
}

impl std::error::Error for AmqpError {}
