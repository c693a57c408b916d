use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_core::{ConnectionId, ConnectionState, PushOutcome, Transport};

/// One live transport session.
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    state: Mutex<ConnectionState>,
    last_pong: AtomicU64,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            state: Mutex::new(ConnectionState::Connecting),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of live WebSocket connections and their outbound queues.
///
/// Holds transport handles only. Subscription state lives in the store.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
    client_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize, client_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
            client_timeout,
        }
    }

    /// Register a new connection in `Connecting` state and return its id and outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.connections
            .insert(id.clone(), Arc::new(Connection::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn mark_connected(&self, id: &ConnectionId) -> bool {
        self.get(id)
            .is_some_and(|c| c.transition(ConnectionState::Connected))
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some((_, connection)) => {
                connection.transition(ConnectionState::Disconnected);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn record_pong(&self, id: &ConnectionId) {
        if let Some(connection) = self.get(id) {
            connection.record_pong();
        }
    }

    /// Queue a frame for one connection without waiting.
    pub fn send(&self, id: &ConnectionId, message: String) -> PushOutcome {
        let Some(connection) = self.get(id) else {
            return PushOutcome::ConnectionGone;
        };
        if connection.state().is_terminal() {
            return PushOutcome::ConnectionGone;
        }

        match connection.tx.try_send(message) {
            Ok(()) => PushOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::debug!(
                    connection_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                PushOutcome::TransientError("send queue full".into())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister(id);
                PushOutcome::ConnectionGone
            }
        }
    }

    /// Number of registered connections, in any non-terminal state.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Remove connections that haven't answered a ping within the client timeout.
    pub fn reap_dead_connections(&self) -> Vec<ConnectionId> {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_alive(self.client_timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(connection_id = %id, "reaped unresponsive connection");
        }
        dead
    }
}

#[async_trait]
impl Transport for ConnectionRegistry {
    async fn push(&self, connection_id: &ConnectionId, payload: &str) -> PushOutcome {
        self.send(connection_id, payload.to_string())
    }
}

/// Periodically reap connections whose heartbeat has lapsed.
///
/// Reaping drops the outbound queue, which ends the session and runs the
/// normal disconnect path.
pub fn start_reaper(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = registry.reap_dead_connections();
                    if !reaped.is_empty() {
                        tracing::info!(reaped = reaped.len(), "dead connection cleanup");
                    }
                }
            }
        }
    })
}
