//! `HelpdeskServer`: Axum HTTP + WebSocket gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use helpdesk_broker::BrokerHandle;
use helpdesk_core::Role;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;
use crate::websocket::slots::ConnectionSlots;

/// How long `/health` waits for the broker.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Front door to the broker task.
    pub broker: BrokerHandle,
    /// Gateway configuration.
    pub config: Arc<ServerConfig>,
    /// Open WebSocket count.
    pub slots: Arc<ConnectionSlots>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// When the server started.
    pub start_time: Instant,
}

/// Query parameters accepted on `/ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// `requester` / `responder` (or `client` / `admin`). Defaults to requester.
    pub role: Option<String>,
}

/// The helpdesk gateway.
pub struct HelpdeskServer {
    config: Arc<ServerConfig>,
    broker: BrokerHandle,
    shutdown: ShutdownCoordinator,
    slots: Arc<ConnectionSlots>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl HelpdeskServer {
    /// Create a new server in front of a running broker.
    pub fn new(config: ServerConfig, broker: BrokerHandle, shutdown: ShutdownCoordinator) -> Self {
        Self {
            config: Arc::new(config),
            broker,
            shutdown,
            slots: Arc::new(ConnectionSlots::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broker: self.broker.clone(),
            config: Arc::clone(&self.config),
            slots: Arc::clone(&self.slots),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(state);

        if let Some(handle) = self.metrics.clone() {
            router = router.route(
                "/metrics",
                get(move || std::future::ready(crate::metrics::render(&handle))),
            );
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and start serving in the background.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task,
    /// which finishes once the shutdown token fires.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, max_connections = self.config.max_connections, "helpdesk server listening");

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
            info!("helpdesk server stopped");
        });

        Ok((addr, handle))
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Number of open WebSocket connections.
    pub fn active_connections(&self) -> usize {
        self.slots.active()
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let stats = tokio::time::timeout(HEALTH_TIMEOUT, state.broker.stats())
        .await
        .ok()
        .and_then(Result::ok);
    let code = if stats.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health::health_check(state.start_time, stats)))
}

/// GET /ws?role=…
async fn ws_handler(
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let role = match params.role.as_deref().map(str::parse::<Role>).transpose() {
        Ok(role) => role.unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "rejecting upgrade with unknown role");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let Some(slot) = state.slots.try_acquire(state.config.max_connections) else {
        counter!(WS_REJECTED_TOTAL).increment(1);
        warn!(
            max_connections = state.config.max_connections,
            "connection limit reached, rejecting upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let AppState {
        broker,
        config,
        shutdown,
        ..
    } = state;
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, role, broker, config, shutdown.token()).await;
            drop(slot);
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use helpdesk_broker::BrokerConfig;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn make_server() -> (HelpdeskServer, CancellationToken) {
        let shutdown = ShutdownCoordinator::new();
        let (broker, _task) = helpdesk_broker::spawn(BrokerConfig::default(), shutdown.token());
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        let token = shutdown.token();
        (HelpdeskServer::new(config, broker, shutdown), token)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (server, _token) = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed.get("activeSessions").is_some());
        assert!(parsed.get("uptimeSecs").is_some());
    }

    #[tokio::test]
    async fn health_reports_unavailable_after_broker_stops() {
        let (server, token) = make_server();
        token.cancel();
        // Let the broker task observe the cancellation.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(resp).await["status"], "unavailable");
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let (server, _token) = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn metrics_route_only_with_recorder() {
        let (server, _token) = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let (server, _token) = make_server();
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = server.with_metrics(handle);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (server, _token) = make_server();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_cancel() {
        let (server, token) = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.active_connections(), 0);
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(server.shutdown().is_shutting_down());
    }
}
