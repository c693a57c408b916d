use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::{ConnectionId, Topic};

use crate::error::StoreError;
use crate::memory::MemorySubscriptionStore;
use crate::subscriptions::SubscriptionStore;

/// Operations a [`FaultyStore`] can be told to fail.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum StoreOp {
    Put,
    Delete,
    DeleteAll,
    ListByTopic,
}

/// In-memory store with switchable failures, for exercising error paths.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemorySubscriptionStore,
    failing: Mutex<HashSet<StoreOp>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: StoreOp) {
        self.failing.lock().insert(op);
    }

    pub fn heal(&self, op: StoreOp) {
        self.failing.lock().remove(&op);
    }

    /// Direct access to the backing records, bypassing injected faults.
    pub fn inner(&self) -> &MemorySubscriptionStore {
        &self.inner
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        if self.failing.lock().contains(&op) {
            return Err(StoreError::Unavailable(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for FaultyStore {
    async fn put(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError> {
        self.check(StoreOp::Put)?;
        self.inner.put(connection_id, topic).await
    }

    async fn delete(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError> {
        self.check(StoreOp::Delete)?;
        self.inner.delete(connection_id, topic).await
    }

    async fn delete_all_for_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<usize, StoreError> {
        self.check(StoreOp::DeleteAll)?;
        self.inner.delete_all_for_connection(connection_id).await
    }

    async fn list_by_topic(&self, topic: &Topic) -> Result<Vec<ConnectionId>, StoreError> {
        self.check(StoreOp::ListByTopic)?;
        self.inner.list_by_topic(topic).await
    }

    async fn contains(
        &self,
        connection_id: &ConnectionId,
        topic: &Topic,
    ) -> Result<bool, StoreError> {
        self.inner.contains(connection_id, topic).await
    }

    async fn list_by_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Vec<Topic>, StoreError> {
        self.inner.list_by_connection(connection_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failure_leaves_state_untouched() {
        let store = FaultyStore::new();
        let c1 = ConnectionId::new();
        store.fail(StoreOp::Put);

        let err = store.put(&c1, &Topic::new("time")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.inner().is_empty());

        store.heal(StoreOp::Put);
        store.put(&c1, &Topic::new("time")).await.unwrap();
        assert_eq!(store.inner().len(), 1);
    }
}
