use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use relay_core::{BatchId, ConnectionId, DataBatch, PushOutcome, Topic, Transport};
use relay_store::{StoreError, SubscriptionStore};
use relay_telemetry::MetricsRecorder;

use crate::protocol::Outbound;

/// A batch that could not be delivered at all.
///
/// Individual delivery failures never produce this; they are reported per
/// target in the [`BatchReport`].
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("could not resolve subscribers for topic {topic}: {source}")]
    Resolve {
        topic: Topic,
        #[source]
        source: StoreError,
    },
    #[error("could not encode batch payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of one per-target push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub connection_id: ConnectionId,
    pub outcome: PushOutcome,
}

/// Everything that happened while fanning out one batch.
#[derive(Clone, Debug)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub topic: Topic,
    pub deliveries: Vec<DeliveryRecord>,
    /// Stale subscriptions removed after `ConnectionGone`.
    pub pruned: usize,
    /// Prune attempts that failed; those records stay for a later batch.
    pub prune_failures: usize,
}

impl BatchReport {
    fn empty(batch: &DataBatch) -> Self {
        Self {
            batch_id: batch.id.clone(),
            topic: batch.topic.clone(),
            deliveries: Vec::new(),
            pruned: 0,
            prune_failures: 0,
        }
    }

    pub fn targets(&self) -> usize {
        self.deliveries.len()
    }

    pub fn delivered(&self) -> usize {
        self.count(|o| o.is_delivered())
    }

    pub fn gone(&self) -> usize {
        self.count(|o| o.is_gone())
    }

    pub fn transient(&self) -> usize {
        self.count(|o| matches!(o, PushOutcome::TransientError(_)))
    }

    pub fn outcome_for(&self, connection_id: &ConnectionId) -> Option<&PushOutcome> {
        self.deliveries
            .iter()
            .find(|d| &d.connection_id == connection_id)
            .map(|d| &d.outcome)
    }

    fn count(&self, pred: impl Fn(&PushOutcome) -> bool) -> usize {
        self.deliveries.iter().filter(|d| pred(&d.outcome)).count()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id.clone(),
            topic: self.topic.clone(),
            targets: self.targets(),
            delivered: self.delivered(),
            gone: self.gone(),
            transient: self.transient(),
            pruned: self.pruned,
        }
    }
}

/// Serializable counts for a finished batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub topic: Topic,
    pub targets: usize,
    pub delivered: usize,
    pub gone: usize,
    pub transient: usize,
    pub pruned: usize,
}

/// Delivers data batches to every current subscriber of the batch's topic.
pub struct BroadcastEngine {
    store: Arc<dyn SubscriptionStore>,
    transport: Arc<dyn Transport>,
    metrics: Arc<MetricsRecorder>,
}

impl BroadcastEngine {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn Transport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            store,
            transport,
            metrics,
        }
    }

    /// Fan one batch out to its subscribers.
    ///
    /// Fails only if the subscriber set cannot be resolved, in which case no
    /// push is attempted. Otherwise every target is pushed concurrently, the
    /// call returns once all pushes have finished, and subscriptions whose
    /// connection turned out to be gone are pruned.
    pub async fn broadcast(&self, batch: &DataBatch) -> Result<BatchReport, BroadcastError> {
        let payload = Outbound::Data {
            topic: batch.topic.clone(),
            records: batch.records.clone(),
        }
        .to_json()?;

        let targets = match self.store.list_by_topic(&batch.topic).await {
            Ok(targets) => targets,
            Err(source) => {
                tracing::error!(
                    batch_id = %batch.id,
                    topic = %batch.topic,
                    error = %source,
                    "failed to resolve subscribers, batch not delivered"
                );
                self.metrics
                    .counter_inc("relay_batches_total", &[("status", "failed")], 1);
                return Err(BroadcastError::Resolve {
                    topic: batch.topic.clone(),
                    source,
                });
            }
        };

        let mut report = BatchReport::empty(batch);
        self.metrics
            .histogram_observe("relay_batch_fanout", &[], targets.len() as f64);

        if targets.is_empty() {
            tracing::debug!(batch_id = %batch.id, topic = %batch.topic, "no subscribers");
            self.metrics
                .counter_inc("relay_batches_total", &[("status", "delivered")], 1);
            return Ok(report);
        }

        report.deliveries = join_all(targets.into_iter().map(|connection_id| {
            let payload = payload.as_str();
            async move {
                let outcome = self.transport.push(&connection_id, payload).await;
                DeliveryRecord {
                    connection_id,
                    outcome,
                }
            }
        }))
        .await;

        for delivery in &report.deliveries {
            self.metrics.counter_inc(
                "relay_deliveries_total",
                &[("outcome", delivery.outcome.kind())],
                1,
            );
            if let PushOutcome::TransientError(reason) = &delivery.outcome {
                tracing::debug!(
                    batch_id = %batch.id,
                    connection_id = %delivery.connection_id,
                    reason = %reason,
                    "delivery abandoned for this batch"
                );
            }
        }

        let (pruned, prune_failures) = self.prune_gone(batch, &report.deliveries).await;
        report.pruned = pruned;
        report.prune_failures = prune_failures;

        self.metrics
            .counter_inc("relay_batches_total", &[("status", "delivered")], 1);
        tracing::info!(
            batch_id = %batch.id,
            topic = %batch.topic,
            records = batch.len(),
            targets = report.targets(),
            delivered = report.delivered(),
            gone = report.gone(),
            transient = report.transient(),
            pruned,
            "batch fanned out"
        );
        Ok(report)
    }

    /// Best-effort removal of subscriptions whose connection is gone.
    /// Returns `(pruned, failed)`.
    async fn prune_gone(&self, batch: &DataBatch, deliveries: &[DeliveryRecord]) -> (usize, usize) {
        let results = join_all(
            deliveries
                .iter()
                .filter(|d| d.outcome.is_gone())
                .map(|d| async move {
                    let result = self.store.delete(&d.connection_id, &batch.topic).await;
                    if let Err(e) = &result {
                        tracing::warn!(
                            batch_id = %batch.id,
                            connection_id = %d.connection_id,
                            topic = %batch.topic,
                            error = %e,
                            "failed to prune stale subscription"
                        );
                    }
                    result.is_ok()
                }),
        )
        .await;

        let pruned = results.iter().filter(|ok| **ok).count();
        if pruned > 0 {
            self.metrics
                .counter_inc("relay_subscriptions_pruned_total", &[], pruned as u64);
        }
        (pruned, results.len() - pruned)
    }
}
