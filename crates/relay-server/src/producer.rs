use std::time::Duration;

use tokio_util::sync::CancellationToken;

use relay_core::{DataBatch, Topic};

use crate::ingest::BatchSender;

/// Built-in clock source: publishes `{"eventTime": <unix millis>}` records on
/// a fixed interval.
#[derive(Clone, Debug)]
pub struct ClockProducer {
    pub topic: Topic,
    pub interval: Duration,
    pub records_per_batch: usize,
}

impl ClockProducer {
    pub fn new(topic: Topic, interval: Duration, records_per_batch: usize) -> Self {
        Self {
            topic,
            interval,
            records_per_batch: records_per_batch.max(1),
        }
    }

    pub fn next_batch(&self) -> DataBatch {
        let records = (0..self.records_per_batch)
            .map(|_| {
                serde_json::json!({ "eventTime": chrono::Utc::now().timestamp_millis() })
                    .to_string()
            })
            .collect();
        DataBatch::new(self.topic.clone(), records)
    }

    pub fn spawn(self, sender: BatchSender, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                topic = %self.topic,
                interval_ms = self.interval.as_millis() as u64,
                records_per_batch = self.records_per_batch,
                "clock producer started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if sender.send(self.next_batch()).await.is_err() {
                            tracing::warn!("batch queue closed, clock producer stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
