use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::{ConnectionId, PushOutcome, Transport};

/// Scripted transport for deterministic tests without sockets.
///
/// Every push is recorded. Connections deliver unless scripted otherwise.
#[derive(Default)]
pub struct MockTransport {
    outcomes: Mutex<HashMap<ConnectionId, PushOutcome>>,
    delays: Mutex<HashMap<ConnectionId, Duration>>,
    pushes: Mutex<Vec<(ConnectionId, String)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every push to `id` return `outcome`.
    pub fn script(&self, id: &ConnectionId, outcome: PushOutcome) {
        self.outcomes.lock().insert(id.clone(), outcome);
    }

    /// Make every push to `id` take `delay` before completing.
    pub fn delay(&self, id: &ConnectionId, delay: Duration) {
        self.delays.lock().insert(id.clone(), delay);
    }

    /// All pushes in the order they completed.
    pub fn pushes(&self) -> Vec<(ConnectionId, String)> {
        self.pushes.lock().clone()
    }

    /// Payloads pushed to one connection, oldest first.
    pub fn pushes_to(&self, id: &ConnectionId) -> Vec<String> {
        self.pushes
            .lock()
            .iter()
            .filter(|(target, _)| target == id)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn push(&self, connection_id: &ConnectionId, payload: &str) -> PushOutcome {
        let delay = self.delays.lock().get(connection_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.pushes
            .lock()
            .push((connection_id.clone(), payload.to_string()));
        self.outcomes
            .lock()
            .get(connection_id)
            .cloned()
            .unwrap_or(PushOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_scripts() {
        let transport = MockTransport::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        transport.script(&b, PushOutcome::ConnectionGone);

        assert_eq!(transport.push(&a, "x").await, PushOutcome::Delivered);
        assert_eq!(transport.push(&b, "y").await, PushOutcome::ConnectionGone);
        assert_eq!(transport.pushes_to(&a), vec!["x".to_string()]);
        assert_eq!(transport.push_count(), 2);
    }
}
