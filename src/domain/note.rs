use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An annotation on an escrow's audit trail. Append-only from the API
/// surface; removal happens through the bulk notes array or an explicit
/// delete, never an in-place edit of history.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct EscrowNote {
    pub id: Uuid,
    pub author_id: String,
    pub body: String,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
}

impl EscrowNote {
    pub fn new(author_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id: author_id.into(),
            body: body.into(),
            pinned: false,
            created_at: Utc::now(),
        }
    }
}
