use serde::{Deserialize, Serialize};

use crate::ids::BatchId;
use crate::topic::Topic;

/// One unit of inbound data from the stream source, scoped to a single topic.
///
/// Records are opaque to the relay and are delivered in the order given.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    pub id: BatchId,
    pub topic: Topic,
    pub records: Vec<String>,
}

impl DataBatch {
    pub fn new(topic: Topic, records: Vec<String>) -> Self {
        Self {
            id: BatchId::new(),
            topic,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
