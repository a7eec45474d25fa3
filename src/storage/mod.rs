pub mod migrations;
pub mod models;
pub mod queue;

pub use models::{QueueRecord, QueueStats};
pub use queue::MessageQueue;
