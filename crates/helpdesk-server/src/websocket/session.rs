//! WebSocket session lifecycle: one connected participant from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use helpdesk_broker::BrokerHandle;
use helpdesk_core::Role;
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};

use super::liveness::Liveness;
use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_HEARTBEAT_TIMEOUTS_TOTAL,
};

/// How long the writer gets to flush after the broker lets go of it.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a connection's writer stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterExit {
    /// The broker dropped the outbound queue.
    QueueClosed,
    /// Writing to the socket failed.
    SocketClosed,
    /// No pong or frame within the heartbeat timeout.
    HeartbeatTimeout,
    /// Server shutdown.
    Cancelled,
}

/// Forward the outbound queue to `sink`, pinging every `interval`.
///
/// Ends with a Close frame when the queue closes, when the peer has been
/// silent for longer than `timeout`, or on `cancel`.
pub async fn write_loop<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Arc<String>>,
    liveness: Arc<Liveness>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
{
    let mut ping_interval = tokio::time::interval(interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = queue.recv() => {
                let Some(text) = msg else {
                    let _ = sink.send(Message::Close(None)).await;
                    return WriterExit::QueueClosed;
                };
                if sink.send(Message::Text(text.as_str().into())).await.is_err() {
                    return WriterExit::SocketClosed;
                }
            }
            _ = ping_interval.tick() => {
                if liveness.timed_out(timeout) {
                    warn!("client unresponsive for {timeout:?}, disconnecting");
                    counter!(WS_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                    let _ = sink.send(Message::Close(None)).await;
                    return WriterExit::HeartbeatTimeout;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return WriterExit::SocketClosed;
                }
            }
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return WriterExit::Cancelled;
            }
        }
    }
}

/// Run a WebSocket session for a connected participant.
///
/// 1. Registers with the broker, which sends the welcome frame
/// 2. Forwards text (and UTF-8 binary) frames to the broker in arrival order;
///    binary frames that are not UTF-8 are rejected with `INVALID_FRAME`
/// 3. Forwards the outbound queue to the socket, with periodic Ping frames
/// 4. Closes unresponsive connections
/// 5. Tells the broker about the disconnect exactly once
#[instrument(skip_all, fields(role = %role, conn_id = tracing::field::Empty))]
pub async fn run_ws_session(
    ws: WebSocket,
    role: Role,
    broker: BrokerHandle,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.outbound_queue.max(1));

    let Ok(id) = broker.connect(role, send_tx).await else {
        warn!("broker unavailable, refusing connection");
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    };
    let _ = Span::current().record("conn_id", tracing::field::display(&id));

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let liveness = Arc::new(Liveness::new());

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&liveness),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
        cancel.clone(),
    ));

    // Inbound frames, in arrival order.
    let reader = async {
        loop {
            let next = tokio::select! {
                next = ws_rx.next() => next,
                () = cancel.cancelled() => break,
            };
            let Some(Ok(msg)) = next else { break };
            liveness.mark_alive();

            let text = match msg {
                Message::Text(t) => t.to_string(),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!(len = data.len(), error = %e, "non-UTF-8 binary frame");
                        let reason = "binary frame is not valid UTF-8";
                        if broker.reject(id.clone(), reason).await.is_err() {
                            warn!("broker stopped while connection was open");
                            break;
                        }
                        continue;
                    }
                },
                Message::Close(_) => {
                    info!("client sent close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            if broker.frame(id.clone(), text).await.is_err() {
                warn!("broker stopped while connection was open");
                break;
            }
        }
    };

    tokio::select! {
        () = reader => {}
        exit = &mut writer => {
            debug!(?exit, "writer finished first");
        }
    }

    // Unregistering drops the outbound queue, so the writer flushes and exits.
    let _ = broker.disconnect(id).await;
    if !writer.is_finished() {
        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
            Ok(exit) => debug!(?exit, "writer drained"),
            Err(_) => writer.abort(),
        }
    }

    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}
