//! Metric names recorded by the broker.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

/// Connections registered (counter, labels: role).
pub const CONNECTIONS_TOTAL: &str = "broker_connections_total";
/// Successful claims (counter).
pub const CLAIMS_TOTAL: &str = "broker_claims_total";
/// Messages relayed between session parties (counter).
pub const RELAYS_TOTAL: &str = "broker_relays_total";
/// Frames rejected with a status (counter, labels: code).
pub const REJECTIONS_TOTAL: &str = "broker_rejections_total";
/// Frames that could not be queued for their target (counter).
pub const DELIVERY_FAILURES_TOTAL: &str = "broker_delivery_failures_total";
/// Sessions ended (counter, labels: reason).
pub const SESSIONS_ENDED_TOTAL: &str = "broker_sessions_ended_total";
/// Requesters currently waiting (gauge).
pub const WAITING: &str = "broker_waiting";
/// Sessions currently active (gauge).
pub const SESSIONS_ACTIVE: &str = "broker_sessions_active";
