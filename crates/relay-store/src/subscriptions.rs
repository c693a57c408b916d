use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use relay_core::{ConnectionId, Topic};

use crate::database::Database;
use crate::error::StoreError;

/// Canonical registry of `(connection, topic)` subscriptions.
///
/// `put` and `delete` are idempotent. Every backend failure is returned as a
/// `StoreError`; an empty `list_by_topic` always means "no subscribers".
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn put(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError>;

    async fn delete(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError>;

    /// Remove every subscription held by a connection. Returns how many were removed.
    async fn delete_all_for_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<usize, StoreError>;

    /// Connections subscribed to `topic`, in no particular order.
    async fn list_by_topic(&self, topic: &Topic) -> Result<Vec<ConnectionId>, StoreError>;

    async fn contains(&self, connection_id: &ConnectionId, topic: &Topic)
        -> Result<bool, StoreError>;

    async fn list_by_connection(&self, connection_id: &ConnectionId)
        -> Result<Vec<Topic>, StoreError>;
}

/// SQLite-backed store keyed by `(connection_id, topic)` with a topic index.
#[derive(Clone)]
pub struct SqliteSubscriptionStore {
    db: Database,
}

impl SqliteSubscriptionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(connection_id = %connection_id, topic = %topic))]
    pub fn insert(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT OR IGNORE INTO subscriptions (connection_id, topic, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![connection_id.as_str(), topic.as_str(), now],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(connection_id = %connection_id, topic = %topic))]
    pub fn remove(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM subscriptions WHERE connection_id = ?1 AND topic = ?2",
                rusqlite::params![connection_id.as_str(), topic.as_str()],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(connection_id = %connection_id))]
    pub fn remove_all_for_connection(&self, connection_id: &ConnectionId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM subscriptions WHERE connection_id = ?1",
                [connection_id.as_str()],
            )?;
            Ok(removed)
        })
    }

    #[instrument(skip(self), fields(topic = %topic))]
    pub fn connections_for_topic(&self, topic: &Topic) -> Result<Vec<ConnectionId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare_cached("SELECT connection_id FROM subscriptions WHERE topic = ?1")?;
            let rows = stmt
                .query_map([topic.as_str()], |row| {
                    Ok(ConnectionId::from_raw(row.get::<_, String>(0)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn exists(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM subscriptions WHERE connection_id = ?1 AND topic = ?2",
                rusqlite::params![connection_id.as_str(), topic.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn topics_for_connection(&self, connection_id: &ConnectionId) -> Result<Vec<Topic>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT topic FROM subscriptions WHERE connection_id = ?1 ORDER BY topic",
            )?;
            let rows = stmt
                .query_map([connection_id.as_str()], |row| {
                    Ok(Topic::new(row.get::<_, String>(0)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn put(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError> {
        let (store, connection_id, topic) = (self.clone(), connection_id.clone(), topic.clone());
        tokio::task::spawn_blocking(move || store.insert(&connection_id, &topic)).await?
    }

    async fn delete(&self, connection_id: &ConnectionId, topic: &Topic) -> Result<(), StoreError> {
        let (store, connection_id, topic) = (self.clone(), connection_id.clone(), topic.clone());
        tokio::task::spawn_blocking(move || store.remove(&connection_id, &topic)).await?
    }

    async fn delete_all_for_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<usize, StoreError> {
        let (store, connection_id) = (self.clone(), connection_id.clone());
        tokio::task::spawn_blocking(move || store.remove_all_for_connection(&connection_id)).await?
    }

    async fn list_by_topic(&self, topic: &Topic) -> Result<Vec<ConnectionId>, StoreError> {
        let (store, topic) = (self.clone(), topic.clone());
        tokio::task::spawn_blocking(move || store.connections_for_topic(&topic)).await?
    }

    async fn contains(
        &self,
        connection_id: &ConnectionId,
        topic: &Topic,
    ) -> Result<bool, StoreError> {
        let (store, connection_id, topic) = (self.clone(), connection_id.clone(), topic.clone());
        tokio::task::spawn_blocking(move || store.exists(&connection_id, &topic)).await?
    }

    async fn list_by_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Vec<Topic>, StoreError> {
        let (store, connection_id) = (self.clone(), connection_id.clone());
        tokio::task::spawn_blocking(move || store.topics_for_connection(&connection_id)).await?
    }
}
