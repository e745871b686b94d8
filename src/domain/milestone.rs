use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneStatus {
    #[default]
    Pending,
    Submitted,
    Approved,
    Rejected,
}

impl MilestoneStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Create-side parse: unrecognized values fall back to `Pending`.
    pub fn parse_or_pending(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_default()
    }

    /// Update-side parse: unrecognized values are ignored so the previous
    /// status is retained. Asymmetric with create on purpose.
    pub fn parse_opt(raw: &str) -> Option<Self> {
        Self::parse(raw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// A named sub-deliverable of an escrow. Amounts are informational sub-splits
/// and are never validated to sum to the parent escrow amount.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct EscrowMilestone {
    pub id: Uuid,
    pub label: String,
    pub status: MilestoneStatus,
    pub sequence: i64,
    pub amount: Option<Decimal>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub evidence_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EscrowMilestone {
    pub fn new(label: impl Into<String>, sequence: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            status: MilestoneStatus::Pending,
            sequence,
            amount: None,
            due_at: None,
            completed_at: None,
            evidence_url: None,
            created_at: Utc::now(),
        }
    }
}
