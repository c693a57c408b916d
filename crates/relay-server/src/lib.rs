pub mod broadcast;
pub mod commands;
pub mod ingest;
pub mod lifecycle;
pub mod mock;
pub mod producer;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use broadcast::{BatchReport, BatchSummary, BroadcastEngine, BroadcastError};
pub use commands::CommandHandler;
pub use ingest::{BatchEnvelope, BatchSender, IngestError, StreamRecord};
pub use lifecycle::ConnectionLifecycle;
pub use protocol::{Action, Command, CommandResponse, CommandStatus, MalformedRequest, Outbound};
pub use registry::ConnectionRegistry;
pub use server::{start, ServerConfig, ServerHandle};
