//! # helpdesk-core
//!
//! Foundation types shared by every helpdesk crate:
//!
//! - **Identifiers**: [`ConnectionId`] and the [`Role`] a connection plays
//! - **Wire protocol**: inbound [`ClientFrame`]s and outbound [`ServerFrame`]s
//! - **Errors**: [`BrokerError`] with its [`ErrorCategory`] and wire [`ErrorCode`]
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use errors::{BrokerError, ErrorCategory, ErrorCode};
pub use ids::{ConnectionId, Role};
pub use protocol::{ClientFrame, EndReason, RosterSnapshot, ServerFrame, SessionStatus};
