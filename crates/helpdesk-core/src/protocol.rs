//! Wire frames exchanged over a helpdesk WebSocket.
//!
//! Inbound frames are a flat envelope `{type, to?, content?}`. Chat bodies
//! stay as [`RawValue`] end to end so they are relayed byte-for-byte.
//!
//! Outbound frames all carry a `type` of `welcome`, `status`, or `message`.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::errors::{BrokerError, ErrorCode};
use crate::ids::{ConnectionId, Role};

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FrameKind {
    Claim,
    Message,
    Status,
    End,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: FrameKind,
    #[serde(default)]
    to: Option<ConnectionId>,
    #[serde(default)]
    content: Option<Box<RawValue>>,
}

/// A parsed inbound frame.
#[derive(Debug)]
pub enum ClientFrame {
    /// Responder asks for the next waiting requester.
    Claim,
    /// Chat message for the sender's counterpart.
    Message {
        /// Explicit target; must match the counterpart when present.
        to: Option<ConnectionId>,
        /// Opaque body, relayed verbatim.
        content: Box<RawValue>,
    },
    /// Sender asks for its current status.
    Status,
    /// Sender ends its session.
    End,
}

impl ClientFrame {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, BrokerError> {
        let raw: RawEnvelope =
            serde_json::from_str(text).map_err(|e| BrokerError::InvalidFrame(e.to_string()))?;
        Ok(match raw.kind {
            FrameKind::Claim => Self::Claim,
            FrameKind::Status => Self::Status,
            FrameKind::End => Self::End,
            FrameKind::Message => match raw.content {
                Some(content) => Self::Message {
                    to: raw.to,
                    content,
                },
                None => {
                    return Err(BrokerError::InvalidFrame(
                        "message frame requires non-null content".into(),
                    ));
                }
            },
        })
    }

    /// Envelope `type` of this frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Message { .. } => "message",
            Self::Status => "status",
            Self::End => "end",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The other party's connection closed.
    CounterpartDisconnected,
    /// One party sent `end`.
    Ended,
    /// No message was relayed within the idle timeout.
    IdleTimeout,
}

impl EndReason {
    /// Wire string for this reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CounterpartDisconnected => "counterpart_disconnected",
            Self::Ended => "ended",
            Self::IdleTimeout => "idle_timeout",
        }
    }
}

/// Queue view broadcast to responders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSnapshot {
    /// Number of requesters waiting.
    pub queue_length: usize,
    /// Waiting requester IDs, earliest first.
    pub waiting: Vec<ConnectionId>,
}

/// A connection's own session state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Whether the connection is currently in a session.
    pub connected: bool,
    /// The other party, for a live session or the one that just ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<ConnectionId>,
    /// 1-based place in the waiting line (waiting requesters only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Set when this status announces the end of a session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
}

impl SessionStatus {
    /// Status for a freshly created session.
    #[must_use]
    pub fn bound(counterpart: ConnectionId) -> Self {
        Self {
            connected: true,
            counterpart: Some(counterpart),
            ..Self::default()
        }
    }

    /// Status announcing the end of a session.
    #[must_use]
    pub fn ended(counterpart: ConnectionId, reason: EndReason) -> Self {
        Self {
            connected: false,
            counterpart: Some(counterpart),
            position: None,
            reason: Some(reason),
        }
    }
}

/// Rejection sent back to the originator of a frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Machine-readable code.
    pub error: ErrorCode,
    /// Human-readable explanation.
    pub message: String,
}

impl From<&BrokerError> for Rejection {
    fn from(err: &BrokerError) -> Self {
        Self {
            error: err.code(),
            message: err.to_string(),
        }
    }
}

/// Payload of a `status` frame.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum StatusFrame {
    /// Roster snapshot (responders).
    Roster(RosterSnapshot),
    /// Session state (either role).
    Session(SessionStatus),
    /// Rejected frame.
    Rejected(Rejection),
}

/// Relayed chat message.
#[derive(Debug, Serialize)]
pub struct RelayedMessage {
    /// Sender's connection ID.
    pub from: ConnectionId,
    /// Body exactly as the sender wrote it.
    pub content: Box<RawValue>,
}

/// Every frame the broker sends.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// First frame after the upgrade.
    Welcome {
        /// The connection's assigned ID.
        id: ConnectionId,
        /// Role the connection was registered with.
        role: Role,
        /// RFC 3339 accept time.
        timestamp: String,
    },
    /// Status update.
    Status(StatusFrame),
    /// Relayed chat message.
    Message(RelayedMessage),
}

impl ServerFrame {
    /// Welcome frame stamped with the current time.
    #[must_use]
    pub fn welcome(id: ConnectionId, role: Role) -> Self {
        Self::Welcome {
            id,
            role,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Roster status frame.
    #[must_use]
    pub fn roster(snapshot: RosterSnapshot) -> Self {
        Self::Status(StatusFrame::Roster(snapshot))
    }

    /// Session status frame.
    #[must_use]
    pub fn session(status: SessionStatus) -> Self {
        Self::Status(StatusFrame::Session(status))
    }

    /// Rejection status frame.
    #[must_use]
    pub fn rejected(err: &BrokerError) -> Self {
        Self::Status(StatusFrame::Rejected(Rejection::from(err)))
    }

    /// Relay frame.
    #[must_use]
    pub fn relay(from: ConnectionId, content: Box<RawValue>) -> Self {
        Self::Message(RelayedMessage { from, content })
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
