//! WebSocket gateway: per-connection session tasks, liveness tracking and
//! the connection limit.

pub mod liveness;
pub mod session;
pub mod slots;
