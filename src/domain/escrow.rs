use crate::domain::milestone::EscrowMilestone;
use crate::domain::note::EscrowNote;
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    #[default]
    Pending,
    Funded,
    Released,
    Disputed,
}

impl EscrowStatus {
    /// Parses a caller-supplied status value. Anything outside the known set
    /// is a validation error, never silently ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "funded" => Ok(Self::Funded),
            "released" => Ok(Self::Released),
            "disputed" => Ok(Self::Disputed),
            other => Err(EscrowError::validation(format!(
                "invalid escrow status '{other}': expected pending, funded, released or disputed"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Funded => "funded",
            Self::Released => "released",
            Self::Disputed => "disputed",
        }
    }
}

/// Platform-held funds for one order.
///
/// Milestones and notes are embedded in the aggregate so a single `save`
/// commits the whole record; a reader never observes a milestone change
/// without its parent mutation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Escrow {
    pub id: Uuid,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: EscrowStatus,
    pub policy_id: Option<String>,
    pub requires_dual_approval: bool,
    /// Informational deadline. No scheduler in this slice promotes an escrow
    /// to released when it passes; an external job would have to poll.
    pub auto_release_at: Option<DateTime<Utc>>,
    pub on_hold: bool,
    pub hold_reason: Option<String>,
    pub funded_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub external_reference: Option<String>,
    /// Open bag stamped with created_by/updated_by/updated_at audit keys.
    pub metadata: Map<String, Value>,
    pub milestones: Vec<EscrowMilestone>,
    pub notes: Vec<EscrowNote>,
    pub created_at: DateTime<Utc>,
}

impl Escrow {
    pub fn new(order_id: impl Into<String>, amount: Decimal, currency: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.into(),
            amount,
            currency,
            status: EscrowStatus::Pending,
            policy_id: None,
            requires_dual_approval: false,
            auto_release_at: None,
            on_hold: false,
            hold_reason: None,
            funded_at: None,
            released_at: None,
            external_reference: None,
            metadata: Map::new(),
            milestones: Vec::new(),
            notes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Applies a status value. Any status may overwrite any other (manual
    /// administrative override is allowed, disputed -> released included);
    /// only the first transition into funded/released sets its timestamp.
    pub fn set_status(&mut self, status: EscrowStatus, now: DateTime<Utc>) {
        self.status = status;
        match status {
            EscrowStatus::Funded => {
                if self.funded_at.is_none() {
                    self.funded_at = Some(now);
                }
            }
            EscrowStatus::Released => {
                if self.released_at.is_none() {
                    self.released_at = Some(now);
                }
            }
            EscrowStatus::Pending | EscrowStatus::Disputed => {}
        }
    }

    pub fn stamp_created(&mut self, actor_id: &str, now: DateTime<Utc>) {
        self.metadata
            .insert("created_by".into(), Value::String(actor_id.to_string()));
        self.metadata
            .insert("created_at".into(), Value::String(now.to_rfc3339()));
        self.metadata
            .insert("source".into(), Value::String("manual".into()));
    }

    pub fn stamp_updated(&mut self, actor_id: &str, now: DateTime<Utc>) {
        self.metadata
            .insert("updated_by".into(), Value::String(actor_id.to_string()));
        self.metadata
            .insert("updated_at".into(), Value::String(now.to_rfc3339()));
    }

    /// Milestones ordered by sequence ascending for display.
    pub fn sorted_milestones(&self) -> Vec<EscrowMilestone> {
        let mut milestones = self.milestones.clone();
        milestones.sort_by_key(|m| m.sequence);
        milestones
    }

    /// Notes ordered pinned-first, then newest-first.
    pub fn sorted_notes(&self) -> Vec<EscrowNote> {
        let mut notes = self.notes.clone();
        notes.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        notes
    }

    /// Next 1-based sequence for a milestone inserted without one. Racy under
    /// concurrent inserts on the same escrow; sequence is a display hint, not
    /// a uniqueness constraint.
    pub fn next_milestone_sequence(&self) -> i64 {
        self.milestones.len() as i64 + 1
    }
}
