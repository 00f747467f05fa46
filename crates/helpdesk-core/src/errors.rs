//! Broker error taxonomy.
//!
//! Every failure the broker can observe is a [`BrokerError`]. Each variant
//! belongs to one [`ErrorCategory`], which decides how the dispatcher reacts:
//!
//! | category | reaction |
//! |---|---|
//! | `Protocol` | rejection status to the sender, frame discarded |
//! | `StateConflict` | rejection status to the sender, no state change |
//! | `Delivery` | target evicted through the normal disconnect path |
//! | `Transport` | the disconnect path itself |
//!
//! No category terminates the broker.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ConnectionId, Role};

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Machine-readable code carried in rejection status frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Frame was not a valid envelope.
    #[serde(rename = "INVALID_FRAME")]
    InvalidFrame,
    /// Sender is already in a session.
    #[serde(rename = "ALREADY_BOUND")]
    AlreadyBound,
    /// Claim found an empty waiting line.
    #[serde(rename = "NOTHING_WAITING")]
    NothingWaiting,
    /// Sender is not in a session.
    #[serde(rename = "NOT_BOUND")]
    NotBound,
    /// Requester is still waiting for a responder.
    #[serde(rename = "NO_COUNTERPART_YET")]
    NoCounterpartYet,
    /// `to` named someone other than the sender's counterpart.
    #[serde(rename = "WRONG_TARGET")]
    WrongTarget,
    /// Action not available to the sender's role.
    #[serde(rename = "ROLE_NOT_PERMITTED")]
    RoleNotPermitted,
    /// Target connection is gone.
    #[serde(rename = "DELIVERY_FAILED")]
    DeliveryFailed,
    /// Transport closed.
    #[serde(rename = "TRANSPORT_CLOSED")]
    TransportClosed,
}

impl ErrorCode {
    /// Wire string for this code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidFrame => "INVALID_FRAME",
            Self::AlreadyBound => "ALREADY_BOUND",
            Self::NothingWaiting => "NOTHING_WAITING",
            Self::NotBound => "NOT_BOUND",
            Self::NoCounterpartYet => "NO_COUNTERPART_YET",
            Self::WrongTarget => "WRONG_TARGET",
            Self::RoleNotPermitted => "ROLE_NOT_PERMITTED",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::TransportClosed => "TRANSPORT_CLOSED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification used to pick the dispatcher's reaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input from a connection.
    Protocol,
    /// Valid input that the current state does not allow.
    StateConflict,
    /// A frame could not be handed to its target.
    Delivery,
    /// A connection's transport went away.
    Transport,
}

// ─────────────────────────────────────────────────────────────────────────────
// BrokerError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by broker operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Frame could not be parsed as an envelope.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The connection already participates in a session.
    #[error("connection {0} is already in a session")]
    AlreadyBound(ConnectionId),

    /// A claim found nobody waiting.
    #[error("no requester is waiting")]
    NothingWaiting,

    /// The sender is not in a session.
    #[error("connection is not in a session")]
    NotBound,

    /// A waiting requester tried to talk before being claimed.
    #[error("no responder has picked up this conversation yet")]
    NoCounterpartYet,

    /// `to` did not match the sender's counterpart.
    #[error("{0} is not this connection's session counterpart")]
    WrongTarget(ConnectionId),

    /// The action is reserved for the other role.
    #[error("{action} is not permitted for {role} connections")]
    RoleNotPermitted {
        /// Role of the sender.
        role: Role,
        /// Attempted action (envelope `type`).
        action: &'static str,
    },

    /// A frame could not be queued for the target connection.
    #[error("delivery to {0} failed")]
    DeliveryFailed(ConnectionId),

    /// The connection's transport closed.
    #[error("transport closed")]
    TransportClosed,
}

impl BrokerError {
    /// Classify this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidFrame(_) => ErrorCategory::Protocol,
            Self::AlreadyBound(_)
            | Self::NothingWaiting
            | Self::NotBound
            | Self::NoCounterpartYet
            | Self::WrongTarget(_)
            | Self::RoleNotPermitted { .. } => ErrorCategory::StateConflict,
            Self::DeliveryFailed(_) => ErrorCategory::Delivery,
            Self::TransportClosed => ErrorCategory::Transport,
        }
    }

    /// Wire code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidFrame(_) => ErrorCode::InvalidFrame,
            Self::AlreadyBound(_) => ErrorCode::AlreadyBound,
            Self::NothingWaiting => ErrorCode::NothingWaiting,
            Self::NotBound => ErrorCode::NotBound,
            Self::NoCounterpartYet => ErrorCode::NoCounterpartYet,
            Self::WrongTarget(_) => ErrorCode::WrongTarget,
            Self::RoleNotPermitted { .. } => ErrorCode::RoleNotPermitted,
            Self::DeliveryFailed(_) => ErrorCode::DeliveryFailed,
            Self::TransportClosed => ErrorCode::TransportClosed,
        }
    }

    /// Whether the sender should be told about this error.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Protocol | ErrorCategory::StateConflict
        )
    }
}
