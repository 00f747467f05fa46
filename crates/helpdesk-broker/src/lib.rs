//! # helpdesk-broker
//!
//! The support-session state machine.
//!
//! - [`registry`]: live connections, their role and outbound queue
//! - [`waiting_line`]: FIFO of requesters awaiting a responder
//! - [`session_table`]: 1:1 requester/responder bindings
//! - [`presence`]: roster fan-out to responders
//! - [`dispatcher`]: applies connect / frame / disconnect events to the above
//! - [`service`]: the single task that owns the dispatcher and serializes
//!   every event through one queue

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod service;
pub mod session_table;
pub mod waiting_line;

pub use dispatcher::{BrokerStats, Dispatcher};
pub use registry::{ConnectionRegistry, Outbound};
pub use service::{BrokerClosed, BrokerConfig, BrokerHandle, spawn};
