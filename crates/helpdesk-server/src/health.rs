//! `/health` endpoint.

use std::time::Instant;

use helpdesk_broker::BrokerStats;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"` while the broker answers, `"unavailable"` otherwise.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live connections of either role.
    pub connections: usize,
    /// Live requesters.
    pub requesters: usize,
    /// Live responders.
    pub responders: usize,
    /// Requesters in the waiting line.
    pub waiting: usize,
    /// Bound pairs.
    pub active_sessions: usize,
}

/// Build a health response. `None` stats means the broker did not answer.
pub fn health_check(start_time: Instant, stats: Option<BrokerStats>) -> HealthResponse {
    let status = if stats.is_some() { "ok" } else { "unavailable" };
    let stats = stats.unwrap_or_default();
    HealthResponse {
        status,
        uptime_secs: start_time.elapsed().as_secs(),
        connections: stats.connections,
        requesters: stats.requesters,
        responders: stats.responders,
        waiting: stats.waiting,
        active_sessions: stats.active_sessions,
    }
}
