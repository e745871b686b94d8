//! Command payloads for the lifecycle engine.
//!
//! `Patch<T>` keeps the wire distinction between a field that was not
//! provided and a field explicitly set to null, so a partial update never
//! clobbers state the caller did not mention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Tri-state field for partial updates: absent (leave untouched), null
/// (explicitly clear), or a concrete value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Patch<T> {
    #[default]
    Absent,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Only reached when the key is present; serde's container default
        // supplies Absent for missing keys.
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Self::Value(value),
            None => Self::Null,
        })
    }
}

/// Payload for manual escrow seeding. `order_id` and a parseable `amount`
/// are the only hard requirements.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CreateEscrow {
    pub order_id: Option<String>,
    pub amount: Option<Value>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub policy_id: Option<String>,
    pub requires_dual_approval: Option<bool>,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub external_reference: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub milestones: Vec<MilestoneDraft>,
    pub note: Option<NoteDraft>,
}

/// Milestone seed supplied at create time. Entries without a non-empty label
/// are skipped; entries without a sequence get a 1-based append order.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MilestoneDraft {
    pub label: Option<String>,
    pub status: Option<String>,
    pub sequence: Option<i64>,
    pub amount: Option<Value>,
    pub due_at: Option<DateTime<Utc>>,
    pub evidence_url: Option<String>,
}

/// Initial note seed supplied at create time.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NoteDraft {
    pub body: Option<String>,
    pub author_id: Option<String>,
    pub pinned: bool,
}

/// Field-by-field escrow patch. Absent fields are left untouched.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EscrowPatch {
    pub status: Patch<String>,
    pub amount: Patch<Value>,
    pub currency: Patch<String>,
    pub policy_id: Patch<String>,
    pub requires_dual_approval: Patch<bool>,
    pub auto_release_at: Patch<DateTime<Utc>>,
    pub on_hold: Patch<bool>,
    pub hold_reason: Patch<String>,
    pub external_reference: Patch<String>,
    pub metadata: Patch<Map<String, Value>>,
    pub milestones: Option<Vec<MilestoneEntry>>,
    pub notes: Option<Vec<NoteEntry>>,
}

/// Bulk milestone entry inside an update: with an id it updates the matching
/// row if found (else it is silently skipped); without an id it inserts.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MilestoneEntry {
    pub id: Option<Uuid>,
    pub label: Option<String>,
    pub status: Option<String>,
    pub sequence: Option<i64>,
    pub amount: Patch<Value>,
    pub due_at: Patch<DateTime<Utc>>,
    pub completed_at: Patch<DateTime<Utc>>,
    pub evidence_url: Patch<String>,
}

/// Bulk note entry inside an update: id plus `_delete` removes, id alone
/// updates body/pinned if found, no id with a non-empty body creates.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NoteEntry {
    pub id: Option<Uuid>,
    pub body: Option<String>,
    pub pinned: Option<bool>,
    pub author_id: Option<String>,
    #[serde(rename = "_delete")]
    pub delete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_distinguishes_absent_from_null() {
        let patch: EscrowPatch =
            serde_json::from_value(json!({ "policy_id": null, "hold_reason": "fraud check" }))
                .unwrap();

        assert_eq!(patch.policy_id, Patch::Null);
        assert_eq!(patch.hold_reason, Patch::Value("fraud check".to_string()));
        assert!(patch.status.is_absent());
        assert!(patch.amount.is_absent());
        assert!(patch.milestones.is_none());
    }

    #[test]
    fn test_note_entry_delete_flag() {
        let entry: NoteEntry =
            serde_json::from_value(json!({ "id": Uuid::new_v4(), "_delete": true })).unwrap();
        assert!(entry.delete);
        let plain: NoteEntry = serde_json::from_value(json!({ "body": "hello" })).unwrap();
        assert!(!plain.delete);
    }

    #[test]
    fn test_create_escrow_defaults() {
        let cmd: CreateEscrow =
            serde_json::from_value(json!({ "order_id": "O1", "amount": "19.995" })).unwrap();
        assert_eq!(cmd.order_id.as_deref(), Some("O1"));
        assert!(cmd.milestones.is_empty());
        assert!(cmd.note.is_none());
    }
}
