//! The broker event loop.
//!
//! One tokio task owns the [`Dispatcher`] and drains a bounded command
//! queue. Connection tasks talk to it through a cloneable [`BrokerHandle`].
//! Because every event goes through that single queue, events are applied
//! strictly one at a time in arrival order.

use std::time::{Duration, Instant};

use helpdesk_core::{ConnectionId, Role, RosterSnapshot};
use helpdesk_settings::BrokerSettings;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatcher::{BrokerStats, Dispatcher};
use crate::registry::Outbound;

/// The broker task has stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("broker is not running")]
pub struct BrokerClosed;

/// Event-loop tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Capacity of the command queue.
    pub command_queue: usize,
    /// End sessions with no relayed message for this long.
    pub idle_timeout: Option<Duration>,
    /// How often to look for idle sessions.
    pub sweep_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::from(&BrokerSettings::default())
    }
}

impl From<&BrokerSettings> for BrokerConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            command_queue: settings.command_queue.max(1),
            idle_timeout: settings.session_idle_timeout_secs.map(Duration::from_secs),
            sweep_interval: Duration::from_secs(settings.idle_sweep_interval_secs.max(1)),
        }
    }
}

/// Commands accepted by the broker task.
#[derive(Debug)]
pub enum BrokerCommand {
    /// Register a new connection.
    Connect {
        /// Role requested at upgrade.
        role: Role,
        /// The connection's writer queue.
        outbound: Outbound,
        /// Receives the assigned ID.
        reply: oneshot::Sender<ConnectionId>,
    },
    /// Inbound text frame.
    Frame {
        /// Sender.
        id: ConnectionId,
        /// Raw frame text.
        text: String,
    },
    /// Inbound frame that is not valid text.
    Undecodable {
        /// Sender.
        id: ConnectionId,
        /// What was wrong with it.
        reason: String,
    },
    /// Transport closed.
    Disconnect {
        /// Closed connection.
        id: ConnectionId,
    },
    /// End idle sessions now.
    SweepIdle,
    /// Current counts.
    Stats {
        /// Receives the counts.
        reply: oneshot::Sender<BrokerStats>,
    },
    /// Current roster.
    Roster {
        /// Receives the snapshot.
        reply: oneshot::Sender<RosterSnapshot>,
    },
}

/// Front door to the broker task.
#[derive(Clone, Debug)]
pub struct BrokerHandle {
    tx: mpsc::Sender<BrokerCommand>,
}

impl BrokerHandle {
    /// Register a connection and wait for its ID.
    pub async fn connect(&self, role: Role, outbound: Outbound) -> Result<ConnectionId, BrokerClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCommand::Connect {
            role,
            outbound,
            reply,
        })
        .await?;
        rx.await.map_err(|_| BrokerClosed)
    }

    /// Forward an inbound text frame.
    pub async fn frame(&self, id: ConnectionId, text: String) -> Result<(), BrokerClosed> {
        self.send(BrokerCommand::Frame { id, text }).await
    }

    /// Report a frame from `id` that could not be decoded as text.
    pub async fn reject(
        &self,
        id: ConnectionId,
        reason: impl Into<String>,
    ) -> Result<(), BrokerClosed> {
        self.send(BrokerCommand::Undecodable {
            id,
            reason: reason.into(),
        })
        .await
    }

    /// Report that a connection's transport closed.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), BrokerClosed> {
        self.send(BrokerCommand::Disconnect { id }).await
    }

    /// Ask the broker to end idle sessions now.
    pub async fn sweep_idle(&self) -> Result<(), BrokerClosed> {
        self.send(BrokerCommand::SweepIdle).await
    }

    /// Current counts.
    pub async fn stats(&self) -> Result<BrokerStats, BrokerClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCommand::Stats { reply }).await?;
        rx.await.map_err(|_| BrokerClosed)
    }

    /// Current roster.
    pub async fn roster(&self) -> Result<RosterSnapshot, BrokerClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCommand::Roster { reply }).await?;
        rx.await.map_err(|_| BrokerClosed)
    }

    /// Whether the broker task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, cmd: BrokerCommand) -> Result<(), BrokerClosed> {
        self.tx.send(cmd).await.map_err(|_| BrokerClosed)
    }
}

/// Start the broker task.
///
/// The task exits when `cancel` fires or every [`BrokerHandle`] has been
/// dropped. Dropping the dispatcher on exit closes every connection's
/// writer queue.
pub fn spawn(config: BrokerConfig, cancel: CancellationToken) -> (BrokerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.command_queue.max(1));
    let handle = tokio::spawn(run(config, rx, cancel));
    (BrokerHandle { tx }, handle)
}

async fn run(config: BrokerConfig, mut rx: mpsc::Receiver<BrokerCommand>, cancel: CancellationToken) {
    let mut dispatcher = Dispatcher::new(config.idle_timeout);
    let sweeping = config.idle_timeout.is_some();
    let mut sweep = tokio::time::interval(config.sweep_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = sweep.tick().await;

    info!(
        command_queue = config.command_queue,
        idle_timeout_secs = config.idle_timeout.map(|d| d.as_secs()),
        "broker started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("broker cancelled");
                break;
            }
            cmd = rx.recv() => {
                match cmd {
                    Some(cmd) => apply(&mut dispatcher, cmd),
                    None => {
                        debug!("all broker handles dropped");
                        break;
                    }
                }
            }
            _ = sweep.tick(), if sweeping => {
                let _ = dispatcher.sweep_idle(now());
            }
        }
    }

    let stats = dispatcher.stats();
    info!(
        connections = stats.connections,
        waiting = stats.waiting,
        active_sessions = stats.active_sessions,
        "broker stopped"
    );
}

/// Current time on the tokio clock, so paused-time tests can drive sweeps.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn apply(dispatcher: &mut Dispatcher, cmd: BrokerCommand) {
    match cmd {
        BrokerCommand::Connect {
            role,
            outbound,
            reply,
        } => {
            let id = dispatcher.connect(role, outbound);
            if let Err(id) = reply.send(id) {
                // Caller went away before learning its ID
                dispatcher.disconnect(&id);
            }
        }
        BrokerCommand::Frame { id, text } => dispatcher.handle_text(&id, &text),
        BrokerCommand::Undecodable { id, reason } => dispatcher.reject_frame(&id, &reason),
        BrokerCommand::Disconnect { id } => dispatcher.disconnect(&id),
        BrokerCommand::SweepIdle => {
            let _ = dispatcher.sweep_idle(now());
        }
        BrokerCommand::Stats { reply } => {
            let _ = reply.send(dispatcher.stats());
        }
        BrokerCommand::Roster { reply } => {
            let _ = reply.send(dispatcher.roster());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn start() -> (BrokerHandle, JoinHandle<()>, CancellationToken) {
        let cancel = CancellationToken::new();
        let (handle, task) = spawn(BrokerConfig::default(), cancel.clone());
        (handle, task, cancel)
    }

    async fn next_json(rx: &mut mpsc::Receiver<Arc<String>>) -> serde_json::Value {
        let msg = rx.recv().await.unwrap();
        serde_json::from_str(&msg).unwrap()
    }

    #[test]
    fn config_from_settings() {
        let settings = BrokerSettings {
            command_queue: 16,
            session_idle_timeout_secs: Some(300),
            idle_sweep_interval_secs: 5,
        };
        let config = BrokerConfig::from(&settings);
        assert_eq!(config.command_queue, 16);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(BrokerConfig::default().idle_timeout, None);
    }

    #[tokio::test]
    async fn connect_returns_id_and_welcome() {
        let (broker, _task, _cancel) = start();
        let (tx, mut rx) = mpsc::channel(16);
        let id = broker.connect(Role::Requester, tx).await.unwrap();
        let welcome = next_json(&mut rx).await;
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["id"], id.as_str());
        let roster = broker.roster().await.unwrap();
        assert_eq!(roster.waiting, vec![id]);
    }

    #[tokio::test]
    async fn frames_are_applied_in_order() {
        let (broker, _task, _cancel) = start();
        let (rtx, mut rrx) = mpsc::channel(16);
        let (atx, _arx) = mpsc::channel(16);
        let _r1 = broker.connect(Role::Requester, rtx).await.unwrap();
        let a = broker.connect(Role::Responder, atx).await.unwrap();

        broker.frame(a.clone(), r#"{"type":"claim"}"#.into()).await.unwrap();
        for i in 0..5 {
            broker
                .frame(a.clone(), format!(r#"{{"type":"message","content":{i}}}"#))
                .await
                .unwrap();
        }
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.active_sessions, 1);

        // welcome, position, bound
        for _ in 0..3 {
            let _ = next_json(&mut rrx).await;
        }
        for i in 0..5 {
            let msg = next_json(&mut rrx).await;
            assert_eq!(msg["from"], a.as_str());
            assert_eq!(msg["content"], i);
        }
        assert_eq!(broker.roster().await.unwrap().queue_length, 0);
    }

    #[tokio::test]
    async fn undecodable_frame_gets_invalid_frame_status() {
        let (broker, _task, _cancel) = start();
        let (tx, mut rx) = mpsc::channel(16);
        let id = broker.connect(Role::Requester, tx).await.unwrap();
        // welcome, position
        let _ = next_json(&mut rx).await;
        let _ = next_json(&mut rx).await;

        broker.reject(id.clone(), "binary frame is not valid UTF-8").await.unwrap();
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["error"], "INVALID_FRAME");
        assert_eq!(broker.roster().await.unwrap().waiting, vec![id]);
    }

    #[tokio::test]
    async fn disconnect_updates_stats() {
        let (broker, _task, _cancel) = start();
        let (tx, _rx) = mpsc::channel(16);
        let id = broker.connect(Role::Responder, tx).await.unwrap();
        assert_eq!(broker.stats().await.unwrap().responders, 1);
        broker.disconnect(id.clone()).await.unwrap();
        broker.disconnect(id).await.unwrap();
        assert_eq!(broker.stats().await.unwrap(), BrokerStats::default());
    }

    #[tokio::test]
    async fn cancel_stops_the_loop() {
        let (broker, task, cancel) = start();
        cancel.cancel();
        task.await.unwrap();
        assert!(broker.is_closed());
        assert_eq!(broker.stats().await, Err(BrokerClosed));
    }

    #[tokio::test]
    async fn dropping_handles_stops_the_loop() {
        let (broker, task, _cancel) = start();
        drop(broker);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_connection_queues() {
        let (broker, task, cancel) = start();
        let (tx, mut rx) = mpsc::channel(16);
        let _ = broker.connect(Role::Requester, tx).await.unwrap();
        cancel.cancel();
        task.await.unwrap();
        while rx.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_swept_on_interval() {
        let cancel = CancellationToken::new();
        let config = BrokerConfig {
            command_queue: 16,
            idle_timeout: Some(Duration::from_secs(60)),
            sweep_interval: Duration::from_secs(10),
        };
        let (broker, _task) = spawn(config, cancel.clone());
        let (rtx, _rrx) = mpsc::channel(16);
        let (atx, _arx) = mpsc::channel(16);
        let _ = broker.connect(Role::Requester, rtx).await.unwrap();
        let a = broker.connect(Role::Responder, atx).await.unwrap();
        broker.frame(a, r#"{"type":"claim"}"#.into()).await.unwrap();
        assert_eq!(broker.stats().await.unwrap().active_sessions, 1);

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert_eq!(broker.stats().await.unwrap().active_sessions, 0);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_idle_on_demand() {
        let cancel = CancellationToken::new();
        let config = BrokerConfig {
            command_queue: 16,
            idle_timeout: Some(Duration::from_secs(60)),
            sweep_interval: Duration::from_secs(3600),
        };
        let (broker, _task) = spawn(config, cancel.clone());
        let (rtx, mut rrx) = mpsc::channel(16);
        let (atx, _arx) = mpsc::channel(16);
        let _ = broker.connect(Role::Requester, rtx).await.unwrap();
        let a = broker.connect(Role::Responder, atx).await.unwrap();
        broker.frame(a, r#"{"type":"claim"}"#.into()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(75)).await;
        // The interval has not come round yet.
        assert_eq!(broker.stats().await.unwrap().active_sessions, 1);

        broker.sweep_idle().await.unwrap();
        assert_eq!(broker.stats().await.unwrap().active_sessions, 0);
        let mut last = None;
        while let Some(msg) = rrx.recv().await {
            last = Some(msg);
        }
        let ended: serde_json::Value = serde_json::from_str(&last.unwrap()).unwrap();
        assert_eq!(ended["reason"], "idle_timeout");
        cancel.cancel();
    }
}
