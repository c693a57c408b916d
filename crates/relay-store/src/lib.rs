pub mod database;
pub mod error;
pub mod faulty;
pub mod memory;
pub mod schema;
pub mod subscriptions;

pub use database::Database;
pub use error::StoreError;
pub use faulty::{FaultyStore, StoreOp};
pub use memory::MemorySubscriptionStore;
pub use subscriptions::{SqliteSubscriptionStore, SubscriptionStore};
