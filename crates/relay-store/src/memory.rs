use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use relay_core::{ConnectionId, Topic};

use crate::error::StoreError;
use crate::subscriptions::SubscriptionStore;

/// Volatile store for tests and single-process deployments that do not need
/// subscriptions to survive a restart.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    by_topic: RwLock<HashMap<Topic, HashSet<ConnectionId>>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of subscription records.
    pub fn len(&self) -> usize {
        self.by_topic.read().values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn put(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError> {
        self.by_topic
            .write()
            .entry(topic.clone())
            .or_default()
            .insert(connection_id.clone());
        Ok(())
    }

    async fn delete(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError> {
        let mut by_topic = self.by_topic.write();
        if let Some(subscribers) = by_topic.get_mut(topic) {
            subscribers.remove(connection_id);
            if subscribers.is_empty() {
                by_topic.remove(topic);
            }
        }
        Ok(())
    }

    async fn delete_all_for_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<usize, StoreError> {
        let mut by_topic = self.by_topic.write();
        let mut removed = 0;
        by_topic.retain(|_, subscribers| {
            if subscribers.remove(connection_id) {
                removed += 1;
            }
            !subscribers.is_empty()
        });
        Ok(removed)
    }

    async fn list_by_topic(&self, topic: &Topic) -> Result<Vec<ConnectionId>, StoreError> {
        Ok(self
            .by_topic
            .read()
            .get(topic)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn contains(
        &self,
        connection_id: &ConnectionId,
        topic: &Topic,
    ) -> Result<bool, StoreError> {
        Ok(self
            .by_topic
            .read()
            .get(topic)
            .is_some_and(|subscribers| subscribers.contains(connection_id)))
    }

    async fn list_by_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Vec<Topic>, StoreError> {
        let mut topics: Vec<Topic> = self
            .by_topic
            .read()
            .iter()
            .filter(|(_, subscribers)| subscribers.contains(connection_id))
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_idempotent() {
        let store = MemorySubscriptionStore::new();
        let c1 = ConnectionId::new();
        store.put(&c1, &Topic::new("time")).await.unwrap();
        store.put(&c1, &Topic::new("time")).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_absent_is_noop() {
        let store = MemorySubscriptionStore::new();
        store
            .delete(&ConnectionId::new(), &Topic::new("time"))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_all_counts_removed() {
        let store = MemorySubscriptionStore::new();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());
        store.put(&c1, &Topic::new("time")).await.unwrap();
        store.put(&c1, &Topic::new("location")).await.unwrap();
        store.put(&c2, &Topic::new("location")).await.unwrap();

        assert_eq!(store.delete_all_for_connection(&c1).await.unwrap(), 2);
        assert!(store.list_by_connection(&c1).await.unwrap().is_empty());
        assert_eq!(
            store.list_by_topic(&Topic::new("location")).await.unwrap(),
            vec![c2]
        );
        assert!(store.list_by_topic(&Topic::new("time")).await.unwrap().is_empty());
    }
}
