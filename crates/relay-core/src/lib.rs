pub mod batch;
pub mod ids;
pub mod topic;
pub mod transport;

pub use batch::DataBatch;
pub use ids::{BatchId, ConnectionId};
pub use topic::{Topic, TopicCatalog, TopicError};
pub use transport::{ConnectionState, PushOutcome, Transport};
