use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One outbound message in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QueueRecord {
    pub id: i64,
    pub topic: String,
    pub payload: String,
    // Column keeps its historical name so older queue files open unchanged.
    #[sqlx(rename = "ts")]
    pub created_at: String,
    pub sent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub sent: i64,
    pub oldest_pending_id: Option<i64>,
    pub max_id: Option<i64>,
}
