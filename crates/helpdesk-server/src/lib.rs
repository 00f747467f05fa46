//! # helpdesk-server
//!
//! Axum HTTP + `WebSocket` gateway in front of the helpdesk broker.
//!
//! - `GET /ws?role=requester|responder`: upgrade, one session task per connection
//! - `GET /health`: liveness plus broker counts
//! - `GET /metrics`: Prometheus text, when a recorder is installed
//! - Heartbeat ping/pong with dead-peer detection
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::HelpdeskServer;
pub use shutdown::ShutdownCoordinator;
