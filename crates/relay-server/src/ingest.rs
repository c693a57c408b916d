use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use relay_core::{DataBatch, TopicCatalog};

use crate::broadcast::BroadcastEngine;

/// Batch as delivered by the upstream stream: base64 records for one topic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub topic: String,
    pub records: Vec<StreamRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Standard base64 of the UTF-8 record text.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
}

impl StreamRecord {
    /// Encode a text record the way the upstream stream does.
    pub fn from_text(text: &str) -> Self {
        Self {
            data: STANDARD.encode(text),
            partition_key: None,
            sequence_number: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("record {index}: invalid base64: {reason}")]
    InvalidBase64 { index: usize, reason: String },
    #[error("record {index}: data is not valid UTF-8")]
    InvalidUtf8 { index: usize },
    #[error("batch queue closed")]
    QueueClosed,
}

impl BatchEnvelope {
    /// Validate the topic and decode every record, preserving order.
    pub fn decode(self, catalog: &TopicCatalog) -> Result<DataBatch, IngestError> {
        let topic = catalog
            .resolve(&self.topic)
            .map_err(|_| IngestError::UnknownTopic(self.topic.clone()))?;

        let records = self
            .records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let bytes = STANDARD
                    .decode(record.data.as_bytes())
                    .map_err(|e| IngestError::InvalidBase64 {
                        index,
                        reason: e.to_string(),
                    })?;
                String::from_utf8(bytes).map_err(|_| IngestError::InvalidUtf8 { index })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DataBatch::new(topic, records))
    }
}

/// Producer side of the in-process batch queue.
#[derive(Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<DataBatch>,
}

impl BatchSender {
    /// Enqueue a batch, waiting for room if the queue is full.
    pub async fn send(&self, batch: DataBatch) -> Result<(), IngestError> {
        self.tx.send(batch).await.map_err(|_| IngestError::QueueClosed)
    }
}

pub fn batch_channel(capacity: usize) -> (BatchSender, mpsc::Receiver<DataBatch>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BatchSender { tx }, rx)
}

/// Drain the batch queue, running each batch as its own broadcast invocation.
///
/// On shutdown, stops taking new batches and waits for in-flight ones.
pub fn spawn_dispatcher(
    mut rx: mpsc::Receiver<DataBatch>,
    engine: Arc<BroadcastEngine>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut in_flight = JoinSet::new();
        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            while in_flight.try_join_next().is_some() {}

            let engine = Arc::clone(&engine);
            let _ = in_flight.spawn(async move {
                if let Err(e) = engine.broadcast(&batch).await {
                    tracing::warn!(batch_id = %batch.id, error = %e, "dispatched batch failed");
                }
            });
        }

        while in_flight.join_next().await.is_some() {}
        tracing::info!("batch dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use relay_core::{ConnectionId, Topic};
    use relay_store::{MemorySubscriptionStore, SubscriptionStore};
    use relay_telemetry::MetricsRecorder;

    fn envelope(topic: &str, records: Vec<StreamRecord>) -> BatchEnvelope {
        BatchEnvelope {
            topic: topic.into(),
            records,
        }
    }

    #[test]
    fn decodes_records_in_order() {
        let batch = envelope(
            "time",
            vec![
                StreamRecord::from_text(r#"{"eventTime":1}"#),
                StreamRecord::from_text(r#"{"eventTime":2}"#),
            ],
        )
        .decode(&TopicCatalog::default())
        .unwrap();

        assert_eq!(batch.topic, Topic::new("time"));
        assert_eq!(batch.records, vec![r#"{"eventTime":1}"#, r#"{"eventTime":2}"#]);
    }

    #[test]
    fn envelope_accepts_stream_metadata() {
        let raw = serde_json::json!({
            "topic": "location",
            "records": [{"data": "aGVsbG8=", "partition_key": "1", "sequence_number": "4960"}]
        });
        let env: BatchEnvelope = serde_json::from_value(raw).unwrap();
        let batch = env.decode(&TopicCatalog::default()).unwrap();
        assert_eq!(batch.records, vec!["hello"]);
    }

    #[test]
    fn unknown_topic_rejected() {
        let err = envelope("weather", vec![])
            .decode(&TopicCatalog::default())
            .unwrap_err();
        assert_eq!(err, IngestError::UnknownTopic("weather".into()));
    }

    #[test]
    fn bad_record_reports_index() {
        let records = vec![
            StreamRecord::from_text("ok"),
            StreamRecord {
                data: "!!not base64!!".into(),
                partition_key: None,
                sequence_number: None,
            },
        ];
        let err = envelope("time", records)
            .decode(&TopicCatalog::default())
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidBase64 { index: 1, .. }));
    }

    #[test]
    fn non_utf8_record_rejected() {
        let records = vec![StreamRecord {
            data: STANDARD.encode([0xff, 0xfe]),
            partition_key: None,
            sequence_number: None,
        }];
        let err = envelope("time", records)
            .decode(&TopicCatalog::default())
            .unwrap_err();
        assert_eq!(err, IngestError::InvalidUtf8 { index: 0 });
    }

    #[tokio::test]
    async fn dispatcher_broadcasts_queued_batches() {
        let store = Arc::new(MemorySubscriptionStore::new());
        let transport = Arc::new(MockTransport::new());
        let engine = Arc::new(BroadcastEngine::new(
            store.clone(),
            transport.clone(),
            Arc::new(MetricsRecorder::new()),
        ));
        let c1 = ConnectionId::new();
        store.put(&c1, &Topic::new("time")).await.unwrap();

        let shutdown = CancellationToken::new();
        let (sender, rx) = batch_channel(8);
        let handle = spawn_dispatcher(rx, engine, shutdown.clone());

        sender
            .send(DataBatch::new(Topic::new("time"), vec!["r1".into()]))
            .await
            .unwrap();
        sender
            .send(DataBatch::new(Topic::new("time"), vec!["r2".into()]))
            .await
            .unwrap();
        drop(sender);

        // Channel closed: the dispatcher drains and exits.
        handle.await.unwrap();
        assert_eq!(transport.pushes_to(&c1).len(), 2);
    }

    #[tokio::test]
    async fn dispatcher_stops_on_shutdown() {
        let engine = Arc::new(BroadcastEngine::new(
            Arc::new(MemorySubscriptionStore::new()),
            Arc::new(MockTransport::new()),
            Arc::new(MetricsRecorder::new()),
        ));
        let shutdown = CancellationToken::new();
        let (sender, rx) = batch_channel(8);
        let handle = spawn_dispatcher(rx, engine, shutdown.clone());

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(
            sender
                .send(DataBatch::new(Topic::new("time"), vec![]))
                .await,
            Err(IngestError::QueueClosed)
        );
    }
}
