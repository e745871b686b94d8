use crate::domain::escrow::{Escrow, EscrowStatus};
use crate::domain::milestone::{EscrowMilestone, MilestoneStatus};
use crate::domain::money::{DEFAULT_CURRENCY, format_currency, normalise_currency, parse_amount};
use crate::domain::note::EscrowNote;
use crate::domain::patch::{CreateEscrow, EscrowPatch, MilestoneEntry, NoteDraft, NoteEntry, Patch};
use crate::domain::ports::{
    EscrowStoreRef, OrderDirectoryRef, OrderSummary, ReleasePolicyRepository,
};
use crate::domain::scope::{ActorContext, ProviderScope};
use crate::error::{EscrowError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Fully hydrated escrow returned by every engine operation: the aggregate
/// plus the order/buyer/service summary from the read-model, milestones
/// sorted by sequence, notes pinned-first then newest-first.
#[derive(Debug, Clone, Serialize)]
pub struct EscrowView {
    pub id: Uuid,
    pub order_id: String,
    pub amount: Decimal,
    pub amount_display: String,
    pub currency: String,
    pub status: EscrowStatus,
    pub policy_id: Option<String>,
    pub requires_dual_approval: bool,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub on_hold: bool,
    pub hold_reason: Option<String>,
    pub funded_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub external_reference: Option<String>,
    pub metadata: Map<String, Value>,
    pub order: Option<OrderSummary>,
    pub milestones: Vec<EscrowMilestone>,
    pub notes: Vec<EscrowNote>,
    pub created_at: DateTime<Utc>,
}

impl EscrowView {
    /// Joins an aggregate with its order summary into the display shape.
    pub fn assemble(escrow: Escrow, order: Option<OrderSummary>) -> Self {
        Self {
            amount_display: format_currency(escrow.amount, &escrow.currency),
            milestones: escrow.sorted_milestones(),
            notes: escrow.sorted_notes(),
            id: escrow.id,
            order_id: escrow.order_id,
            amount: escrow.amount,
            currency: escrow.currency,
            status: escrow.status,
            policy_id: escrow.policy_id,
            requires_dual_approval: escrow.requires_dual_approval,
            auto_release_at: escrow.auto_release_at,
            on_hold: escrow.on_hold,
            hold_reason: escrow.hold_reason,
            funded_at: escrow.funded_at,
            released_at: escrow.released_at,
            external_reference: escrow.external_reference,
            metadata: escrow.metadata,
            order,
            created_at: escrow.created_at,
        }
    }
}

/// Orchestrates escrow status transitions, milestone and note bookkeeping,
/// and policy-driven rules over the storage ports.
///
/// Mutations serialize per escrow through an async lock map (the row-lock
/// analogue); the aggregate is saved whole, so a concurrent reader never
/// observes a milestone change without its parent mutation.
pub struct EscrowEngine {
    store: EscrowStoreRef,
    directory: OrderDirectoryRef,
    policies: Arc<dyn ReleasePolicyRepository>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl EscrowEngine {
    pub fn new(
        store: EscrowStoreRef,
        directory: OrderDirectoryRef,
        policies: Arc<dyn ReleasePolicyRepository>,
    ) -> Self {
        Self {
            store,
            directory,
            policies,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds a new escrow from an existing order. The one-escrow-per-order
    /// invariant is checked here and enforced again by the store insert.
    pub async fn create(&self, cmd: CreateEscrow, actor: &ActorContext) -> Result<EscrowView> {
        let order_id = cmd
            .order_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EscrowError::validation("order_id is required"))?
            .to_string();

        let amount_raw = cmd
            .amount
            .as_ref()
            .ok_or_else(|| EscrowError::validation("amount is required"))?;
        let amount = parse_amount(amount_raw, None)
            .ok_or_else(|| EscrowError::validation("amount must be a non-negative numeric value"))?;

        if !self.directory.order_exists(&order_id).await? {
            return Err(EscrowError::validation(format!(
                "order '{order_id}' does not exist"
            )));
        }
        if self.store.find_by_order(&order_id).await?.is_some() {
            return Err(EscrowError::validation(format!(
                "an escrow already exists for order '{order_id}'"
            )));
        }

        let now = Utc::now();
        let currency = normalise_currency(cmd.currency.as_deref(), DEFAULT_CURRENCY);
        let mut escrow = Escrow::new(order_id, amount, currency);

        if let Some(raw) = cmd.status.as_deref() {
            escrow.set_status(EscrowStatus::parse(raw)?, now);
        }
        if let Some(dual) = cmd.requires_dual_approval {
            escrow.requires_dual_approval = dual;
        }
        escrow.auto_release_at = cmd.auto_release_at;
        escrow.external_reference = cmd
            .external_reference
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if let Some(extra) = cmd.metadata {
            for (key, value) in extra {
                escrow.metadata.insert(key, value);
            }
        }
        escrow.policy_id = cmd
            .policy_id
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        // Milestone seeds: skip entries without a usable label, hand out a
        // 1-based sequence to entries lacking one.
        for draft in &cmd.milestones {
            let Some(label) = draft.label.as_deref().map(str::trim).filter(|l| !l.is_empty())
            else {
                continue;
            };
            let sequence = draft
                .sequence
                .unwrap_or_else(|| escrow.next_milestone_sequence());
            let mut milestone = EscrowMilestone::new(label, sequence);
            if let Some(raw) = draft.status.as_deref() {
                milestone.status = MilestoneStatus::parse_or_pending(raw);
            }
            if let Some(raw) = &draft.amount {
                milestone.amount = parse_amount(raw, None);
            }
            milestone.due_at = draft.due_at;
            milestone.evidence_url = draft
                .evidence_url
                .clone()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty());
            escrow.milestones.push(milestone);
        }

        if let Some(draft) = &cmd.note
            && let Some(body) = draft.body.as_deref().map(str::trim).filter(|b| !b.is_empty())
        {
            let author = draft
                .author_id
                .clone()
                .unwrap_or_else(|| actor.actor_id.clone());
            let mut note = EscrowNote::new(author, body);
            note.pinned = draft.pinned;
            escrow.notes.push(note);
        }

        self.apply_policy_rules(&mut escrow, now, true).await?;
        escrow.stamp_created(&actor.actor_id, now);

        self.store.insert(escrow.clone()).await?;
        tracing::info!(escrow = %escrow.id, order = %escrow.order_id, "created escrow");
        self.hydrate(escrow).await
    }

    /// Row-locked read-modify-write of a single escrow. Absent patch fields
    /// are left untouched; present-but-null fields are explicitly cleared.
    pub async fn update(
        &self,
        id: Uuid,
        patch: EscrowPatch,
        actor: &ActorContext,
        scope: Option<&ProviderScope>,
    ) -> Result<EscrowView> {
        let _guard = self.lock_escrow(id).await;
        let mut escrow = self.fetch_scoped(id, scope).await?;
        let now = Utc::now();

        match &patch.status {
            Patch::Absent => {}
            Patch::Null => {
                return Err(EscrowError::validation(
                    "status cannot be null: expected pending, funded, released or disputed",
                ));
            }
            Patch::Value(raw) => escrow.set_status(EscrowStatus::parse(raw)?, now),
        }

        // A malformed or null amount degrades to a no-op, not a failure:
        // the current amount is the parse fallback.
        if let Patch::Value(raw) = &patch.amount
            && let Some(amount) = parse_amount(raw, Some(escrow.amount))
        {
            escrow.amount = amount;
        }

        if let Patch::Value(raw) = &patch.currency {
            escrow.currency = normalise_currency(Some(raw.as_str()), &escrow.currency);
        }

        let policy_changed = !patch.policy_id.is_absent();
        match &patch.policy_id {
            Patch::Absent => {}
            Patch::Null => escrow.policy_id = None,
            Patch::Value(raw) => {
                escrow.policy_id = Some(raw.trim().to_string()).filter(|p| !p.is_empty());
            }
        }

        if let Patch::Value(dual) = patch.requires_dual_approval {
            escrow.requires_dual_approval = dual;
        }

        match patch.auto_release_at {
            Patch::Absent => {}
            Patch::Null => escrow.auto_release_at = None,
            Patch::Value(at) => escrow.auto_release_at = Some(at),
        }

        match &patch.hold_reason {
            Patch::Absent => {}
            Patch::Null => escrow.hold_reason = None,
            Patch::Value(reason) => {
                escrow.hold_reason = Some(reason.trim().to_string()).filter(|r| !r.is_empty());
            }
        }

        match patch.on_hold {
            Patch::Absent | Patch::Null => {}
            Patch::Value(true) => {
                if escrow.hold_reason.is_none() {
                    return Err(EscrowError::validation(
                        "hold_reason is required when placing an escrow on hold",
                    ));
                }
                escrow.on_hold = true;
            }
            Patch::Value(false) => {
                escrow.on_hold = false;
                // Lifting the hold clears the reason as a side effect.
                escrow.hold_reason = None;
            }
        }

        match &patch.external_reference {
            Patch::Absent => {}
            Patch::Null => escrow.external_reference = None,
            Patch::Value(reference) => {
                escrow.external_reference =
                    Some(reference.trim().to_string()).filter(|r| !r.is_empty());
            }
        }

        // The metadata bag merges key-by-key; it carries the audit trail and
        // is never cleared wholesale.
        if let Patch::Value(extra) = &patch.metadata {
            for (key, value) in extra {
                escrow.metadata.insert(key.clone(), value.clone());
            }
        }

        if let Some(entries) = &patch.milestones {
            for entry in entries {
                self.apply_milestone_entry(&mut escrow, entry, false)?;
            }
        }
        if let Some(entries) = &patch.notes {
            for entry in entries {
                apply_note_entry(&mut escrow, entry, actor);
            }
        }

        self.apply_policy_rules(&mut escrow, now, policy_changed).await?;
        escrow.stamp_updated(&actor.actor_id, now);

        self.store.save(escrow.clone()).await?;
        tracing::info!(escrow = %id, "updated escrow");
        self.hydrate(escrow).await
    }

    pub async fn get(&self, id: Uuid, scope: Option<&ProviderScope>) -> Result<EscrowView> {
        let escrow = self.fetch_scoped(id, scope).await?;
        tracing::debug!(escrow = %id, "fetched escrow");
        self.hydrate(escrow).await
    }

    /// Appends a note. The body must be non-empty after trimming.
    pub async fn add_note(
        &self,
        escrow_id: Uuid,
        draft: NoteDraft,
        actor: &ActorContext,
        scope: Option<&ProviderScope>,
    ) -> Result<EscrowView> {
        let _guard = self.lock_escrow(escrow_id).await;
        let mut escrow = self.fetch_scoped(escrow_id, scope).await?;

        let body = draft
            .body
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| EscrowError::validation("note body must not be empty"))?;
        let author = draft
            .author_id
            .clone()
            .unwrap_or_else(|| actor.actor_id.clone());
        let mut note = EscrowNote::new(author, body);
        note.pinned = draft.pinned;
        escrow.notes.push(note);

        escrow.stamp_updated(&actor.actor_id, Utc::now());
        self.store.save(escrow.clone()).await?;
        tracing::info!(escrow = %escrow_id, "added note");
        self.hydrate(escrow).await
    }

    /// Deletes a note by id. Deleting a note that does not exist is a silent
    /// success; other notes are untouched either way.
    pub async fn delete_note(
        &self,
        escrow_id: Uuid,
        note_id: Uuid,
        actor: &ActorContext,
        scope: Option<&ProviderScope>,
    ) -> Result<EscrowView> {
        let _guard = self.lock_escrow(escrow_id).await;
        let mut escrow = self.fetch_scoped(escrow_id, scope).await?;

        let before = escrow.notes.len();
        escrow.notes.retain(|n| n.id != note_id);
        if escrow.notes.len() != before {
            escrow.stamp_updated(&actor.actor_id, Utc::now());
            self.store.save(escrow.clone()).await?;
            tracing::info!(escrow = %escrow_id, note = %note_id, "deleted note");
        }
        self.hydrate(escrow).await
    }

    /// Upsert-by-id: with an id the milestone must already belong to this
    /// escrow or the call fails not-found; without an id it always inserts.
    pub async fn upsert_milestone(
        &self,
        escrow_id: Uuid,
        entry: MilestoneEntry,
        actor: &ActorContext,
        scope: Option<&ProviderScope>,
    ) -> Result<EscrowView> {
        let _guard = self.lock_escrow(escrow_id).await;
        let mut escrow = self.fetch_scoped(escrow_id, scope).await?;

        self.apply_milestone_entry(&mut escrow, &entry, true)?;

        escrow.stamp_updated(&actor.actor_id, Utc::now());
        self.store.save(escrow.clone()).await?;
        tracing::info!(escrow = %escrow_id, "upserted milestone");
        self.hydrate(escrow).await
    }

    pub async fn delete_milestone(
        &self,
        escrow_id: Uuid,
        milestone_id: Uuid,
        actor: &ActorContext,
        scope: Option<&ProviderScope>,
    ) -> Result<EscrowView> {
        let _guard = self.lock_escrow(escrow_id).await;
        let mut escrow = self.fetch_scoped(escrow_id, scope).await?;

        let before = escrow.milestones.len();
        escrow.milestones.retain(|m| m.id != milestone_id);
        if escrow.milestones.len() == before {
            return Err(EscrowError::not_found(format!(
                "milestone '{milestone_id}' not found on escrow '{escrow_id}'"
            )));
        }

        escrow.stamp_updated(&actor.actor_id, Utc::now());
        self.store.save(escrow.clone()).await?;
        tracing::info!(escrow = %escrow_id, milestone = %milestone_id, "deleted milestone");
        self.hydrate(escrow).await
    }

    async fn lock_escrow(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let cell = {
            let mut locks = self.locks.lock().await;
            locks.entry(id).or_default().clone()
        };
        cell.lock_owned().await
    }

    /// Loads an escrow, applying the provider scope filter when present.
    /// Out-of-scope records are indistinguishable from missing ones.
    async fn fetch_scoped(&self, id: Uuid, scope: Option<&ProviderScope>) -> Result<Escrow> {
        let escrow = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| EscrowError::not_found(format!("escrow '{id}' not found")))?;

        if let Some(scope) = scope {
            let order = self.directory.order_summary(&escrow.order_id).await?;
            let visible = order
                .as_ref()
                .is_some_and(|o| scope.covers(o.provider_id.as_deref(), o.company_id.as_deref()));
            if !visible {
                return Err(EscrowError::not_found(format!("escrow '{id}' not found")));
            }
        }
        Ok(escrow)
    }

    /// Milestone create/update shared by the explicit upsert (strict: missing
    /// ids and empty labels are errors) and the bulk array inside `update`
    /// (lenient: unmatched ids are silently skipped).
    fn apply_milestone_entry(
        &self,
        escrow: &mut Escrow,
        entry: &MilestoneEntry,
        strict: bool,
    ) -> Result<()> {
        match entry.id {
            Some(milestone_id) => {
                let Some(milestone) = escrow.milestones.iter_mut().find(|m| m.id == milestone_id)
                else {
                    if strict {
                        return Err(EscrowError::not_found(format!(
                            "milestone '{milestone_id}' not found on escrow '{}'",
                            escrow.id
                        )));
                    }
                    return Ok(());
                };

                if let Some(label) = entry.label.as_deref() {
                    let trimmed = label.trim();
                    if trimmed.is_empty() {
                        if strict {
                            return Err(EscrowError::validation(
                                "milestone label must not be empty",
                            ));
                        }
                    } else {
                        milestone.label = trimmed.to_string();
                    }
                }
                // Unknown status values on update retain the previous value.
                if let Some(raw) = entry.status.as_deref()
                    && let Some(status) = MilestoneStatus::parse_opt(raw)
                {
                    milestone.status = status;
                }
                if let Some(sequence) = entry.sequence {
                    milestone.sequence = sequence;
                }
                match &entry.amount {
                    Patch::Absent => {}
                    Patch::Null => milestone.amount = None,
                    Patch::Value(raw) => milestone.amount = parse_amount(raw, milestone.amount),
                }
                match &entry.due_at {
                    Patch::Absent => {}
                    Patch::Null => milestone.due_at = None,
                    Patch::Value(at) => milestone.due_at = Some(*at),
                }
                match &entry.completed_at {
                    Patch::Absent => {}
                    Patch::Null => milestone.completed_at = None,
                    Patch::Value(at) => milestone.completed_at = Some(*at),
                }
                match &entry.evidence_url {
                    Patch::Absent => {}
                    Patch::Null => milestone.evidence_url = None,
                    Patch::Value(url) => {
                        milestone.evidence_url =
                            Some(url.trim().to_string()).filter(|u| !u.is_empty());
                    }
                }
                Ok(())
            }
            None => {
                let Some(label) = entry.label.as_deref().map(str::trim).filter(|l| !l.is_empty())
                else {
                    if strict {
                        return Err(EscrowError::validation("milestone label must not be empty"));
                    }
                    return Ok(());
                };
                let sequence = entry
                    .sequence
                    .unwrap_or_else(|| escrow.next_milestone_sequence());
                let mut milestone = EscrowMilestone::new(label, sequence);
                // Unknown status values on create fall back to pending.
                if let Some(raw) = entry.status.as_deref() {
                    milestone.status = MilestoneStatus::parse_or_pending(raw);
                }
                if let Patch::Value(raw) = &entry.amount {
                    milestone.amount = parse_amount(raw, None);
                }
                if let Patch::Value(at) = &entry.due_at {
                    milestone.due_at = Some(*at);
                }
                if let Patch::Value(at) = &entry.completed_at {
                    milestone.completed_at = Some(*at);
                }
                if let Patch::Value(url) = &entry.evidence_url {
                    milestone.evidence_url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
                }
                escrow.milestones.push(milestone);
                Ok(())
            }
        }
    }

    /// Policy-driven rules: a resolving policy may force dual approval and
    /// caps the amount; `fill_auto_release` arms the informational deadline
    /// only when the policy is newly attached, so a cleared deadline stays
    /// cleared on unrelated updates. Unknown policy ids are accepted as-is
    /// (the reference is free-form, not a foreign key).
    async fn apply_policy_rules(
        &self,
        escrow: &mut Escrow,
        now: DateTime<Utc>,
        fill_auto_release: bool,
    ) -> Result<()> {
        let Some(policy_id) = escrow.policy_id.clone() else {
            return Ok(());
        };
        let policies = self.policies.list(None).await?;
        let Some(policy) = policies.into_iter().find(|p| p.id == policy_id) else {
            return Ok(());
        };

        if policy.requires_dual_approval {
            escrow.requires_dual_approval = true;
        }
        if let Some(cap) = policy.max_amount
            && escrow.amount > cap
        {
            return Err(EscrowError::validation(format!(
                "amount {} exceeds the '{}' policy cap of {}",
                escrow.amount, policy.id, cap
            )));
        }
        if fill_auto_release && policy.auto_release_days > 0 && escrow.auto_release_at.is_none() {
            escrow.auto_release_at = Some(now + Duration::days(policy.auto_release_days));
        }
        Ok(())
    }

    async fn hydrate(&self, escrow: Escrow) -> Result<EscrowView> {
        let order = self.directory.order_summary(&escrow.order_id).await?;
        Ok(EscrowView::assemble(escrow, order))
    }
}

/// Bulk note conventions: id + `_delete` removes (idempotently), id alone
/// updates body/pinned when found and is otherwise skipped, no id with a
/// non-empty body creates a note attributed to the supplied author or the
/// acting actor.
fn apply_note_entry(escrow: &mut Escrow, entry: &NoteEntry, actor: &ActorContext) {
    match entry.id {
        Some(note_id) if entry.delete => {
            escrow.notes.retain(|n| n.id != note_id);
        }
        Some(note_id) => {
            if let Some(note) = escrow.notes.iter_mut().find(|n| n.id == note_id) {
                if let Some(body) = entry.body.as_deref() {
                    let trimmed = body.trim();
                    if !trimmed.is_empty() {
                        note.body = trimmed.to_string();
                    }
                }
                if let Some(pinned) = entry.pinned {
                    note.pinned = pinned;
                }
            }
        }
        None => {
            let Some(body) = entry.body.as_deref().map(str::trim).filter(|b| !b.is_empty())
            else {
                return;
            };
            let author = entry
                .author_id
                .clone()
                .unwrap_or_else(|| actor.actor_id.clone());
            let mut note = EscrowNote::new(author, body);
            note.pinned = entry.pinned.unwrap_or(false);
            escrow.notes.push(note);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::policies::PlatformPolicyRegistry;
    use crate::domain::patch::MilestoneDraft;
    use crate::infrastructure::in_memory::{
        InMemoryEscrowStore, InMemoryOrderDirectory, InMemorySettingsStore,
    };
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn engine_with_orders(orders: &[&str]) -> (EscrowEngine, Arc<InMemoryOrderDirectory>) {
        let directory = Arc::new(InMemoryOrderDirectory::new());
        for order in orders {
            directory.register_order(OrderSummary {
                order_id: order.to_string(),
                buyer_id: format!("buyer-{order}"),
                buyer_name: "Test Buyer".into(),
                service_id: format!("svc-{order}"),
                service_title: "Boiler installation".into(),
                provider_id: Some("p1".into()),
                company_id: Some("c1".into()),
                region: Some("london".into()),
                disputes: Vec::new(),
            });
        }
        let settings = Arc::new(InMemorySettingsStore::new());
        let policies = Arc::new(PlatformPolicyRegistry::new(settings));
        let engine = EscrowEngine::new(
            Arc::new(InMemoryEscrowStore::new()),
            directory.clone(),
            policies,
        );
        (engine, directory)
    }

    fn create_cmd(order: &str, amount: Value) -> CreateEscrow {
        CreateEscrow {
            order_id: Some(order.to_string()),
            amount: Some(amount),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_normalises_amount_and_currency() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let mut cmd = create_cmd("O1", json!(150.005));
        cmd.currency = Some("gbp".into());

        let view = engine.create(cmd, &ActorContext::system()).await.unwrap();
        assert_eq!(view.amount, dec!(150.01));
        assert_eq!(view.currency, "GBP");
        assert_eq!(view.status, EscrowStatus::Pending);
        assert_eq!(view.amount_display, "£150.01");
        assert_eq!(view.metadata["created_by"], "system");
        assert_eq!(view.metadata["source"], "manual");
        assert!(view.order.is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_order() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        engine
            .create(create_cmd("O1", json!(10)), &actor)
            .await
            .unwrap();

        let err = engine
            .create(create_cmd("O1", json!(99)), &actor)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_create_requires_order_and_amount() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();

        let err = engine
            .create(CreateEscrow::default(), &actor)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("order_id"));

        let err = engine
            .create(
                CreateEscrow {
                    order_id: Some("O1".into()),
                    ..Default::default()
                },
                &actor,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("amount"));

        let err = engine
            .create(create_cmd("O1", json!(-4)), &actor)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_order() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let err = engine
            .create(create_cmd("O2", json!(10)), &ActorContext::system())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_create_seeds_milestones_and_note() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let mut cmd = create_cmd("O1", json!(100));
        cmd.milestones = vec![
            MilestoneDraft {
                label: Some("Site survey".into()),
                ..Default::default()
            },
            MilestoneDraft {
                label: Some("   ".into()),
                ..Default::default()
            },
            MilestoneDraft {
                label: Some("Installation".into()),
                status: Some("bogus".into()),
                ..Default::default()
            },
        ];
        cmd.note = Some(NoteDraft {
            body: Some("created from back office".into()),
            author_id: None,
            pinned: true,
        });

        let view = engine
            .create(cmd, &ActorContext::new("admin-1"))
            .await
            .unwrap();
        assert_eq!(view.milestones.len(), 2);
        assert_eq!(view.milestones[0].label, "Site survey");
        assert_eq!(view.milestones[0].sequence, 1);
        assert_eq!(view.milestones[1].sequence, 2);
        assert_eq!(view.milestones[1].status, MilestoneStatus::Pending);
        assert_eq!(view.notes.len(), 1);
        assert_eq!(view.notes[0].author_id, "admin-1");
        assert!(view.notes[0].pinned);
    }

    #[tokio::test]
    async fn test_timestamp_once_through_status_cycle() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        let view = engine
            .create(create_cmd("O1", json!(50)), &actor)
            .await
            .unwrap();

        let funded: EscrowPatch = serde_json::from_value(json!({ "status": "funded" })).unwrap();
        let view = engine.update(view.id, funded, &actor, None).await.unwrap();
        let first_funded_at = view.funded_at.expect("funded_at should be set");

        let disputed: EscrowPatch = serde_json::from_value(json!({ "status": "disputed" })).unwrap();
        let view = engine.update(view.id, disputed, &actor, None).await.unwrap();
        assert_eq!(view.status, EscrowStatus::Disputed);

        let refunded: EscrowPatch = serde_json::from_value(json!({ "status": "funded" })).unwrap();
        let view = engine.update(view.id, refunded, &actor, None).await.unwrap();
        assert_eq!(view.funded_at, Some(first_funded_at));
    }

    #[tokio::test]
    async fn test_disputed_to_released_manual_override() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        let mut cmd = create_cmd("O1", json!(50));
        cmd.status = Some("disputed".into());
        let view = engine.create(cmd, &actor).await.unwrap();

        let released: EscrowPatch = serde_json::from_value(json!({ "status": "released" })).unwrap();
        let view = engine.update(view.id, released, &actor, None).await.unwrap();
        assert_eq!(view.status, EscrowStatus::Released);
        assert!(view.released_at.is_some());
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_status() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        let view = engine
            .create(create_cmd("O1", json!(50)), &actor)
            .await
            .unwrap();

        let bad: EscrowPatch = serde_json::from_value(json!({ "status": "refunded" })).unwrap();
        let err = engine.update(view.id, bad, &actor, None).await.unwrap_err();
        assert!(err.is_validation());

        let null_status: EscrowPatch = serde_json::from_value(json!({ "status": null })).unwrap();
        let err = engine
            .update(view.id, null_status, &actor, None)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_malformed_amount_update_is_noop() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        let view = engine
            .create(create_cmd("O1", json!(50)), &actor)
            .await
            .unwrap();

        let bad: EscrowPatch = serde_json::from_value(json!({ "amount": "not-a-number" })).unwrap();
        let view = engine.update(view.id, bad, &actor, None).await.unwrap();
        assert_eq!(view.amount, dec!(50.00));

        let negative: EscrowPatch = serde_json::from_value(json!({ "amount": -3 })).unwrap();
        let view = engine.update(view.id, negative, &actor, None).await.unwrap();
        assert_eq!(view.amount, dec!(50.00));

        let good: EscrowPatch = serde_json::from_value(json!({ "amount": "75.005" })).unwrap();
        let view = engine.update(view.id, good, &actor, None).await.unwrap();
        assert_eq!(view.amount, dec!(75.01));
    }

    #[tokio::test]
    async fn test_on_hold_requires_reason_and_clears_it() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        let view = engine
            .create(create_cmd("O1", json!(50)), &actor)
            .await
            .unwrap();

        let no_reason: EscrowPatch = serde_json::from_value(json!({ "on_hold": true })).unwrap();
        let err = engine
            .update(view.id, no_reason, &actor, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("hold_reason"));

        let held: EscrowPatch =
            serde_json::from_value(json!({ "on_hold": true, "hold_reason": "fraud review" }))
                .unwrap();
        let view = engine.update(view.id, held, &actor, None).await.unwrap();
        assert!(view.on_hold);
        assert_eq!(view.hold_reason.as_deref(), Some("fraud review"));

        let lifted: EscrowPatch = serde_json::from_value(json!({ "on_hold": false })).unwrap();
        let view = engine.update(view.id, lifted, &actor, None).await.unwrap();
        assert!(!view.on_hold);
        assert_eq!(view.hold_reason, None);
    }

    #[tokio::test]
    async fn test_update_distinguishes_clear_from_untouched() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        let mut cmd = create_cmd("O1", json!(50));
        cmd.external_reference = Some("BANK-REF-1".into());
        let view = engine.create(cmd, &actor).await.unwrap();

        // Absent field stays put.
        let unrelated: EscrowPatch =
            serde_json::from_value(json!({ "requires_dual_approval": true })).unwrap();
        let view = engine.update(view.id, unrelated, &actor, None).await.unwrap();
        assert_eq!(view.external_reference.as_deref(), Some("BANK-REF-1"));

        // Explicit null clears.
        let cleared: EscrowPatch =
            serde_json::from_value(json!({ "external_reference": null })).unwrap();
        let view = engine.update(view.id, cleared, &actor, None).await.unwrap();
        assert_eq!(view.external_reference, None);
    }

    #[tokio::test]
    async fn test_milestone_upsert_and_delete() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        let view = engine
            .create(create_cmd("O1", json!(150)), &actor)
            .await
            .unwrap();

        let view = engine
            .upsert_milestone(
                view.id,
                serde_json::from_value(json!({ "label": "Site survey" })).unwrap(),
                &actor,
                None,
            )
            .await
            .unwrap();
        assert_eq!(view.milestones.len(), 1);
        let milestone = view.milestones[0].clone();
        assert_eq!(milestone.sequence, 1);
        assert_eq!(milestone.status, MilestoneStatus::Pending);

        let view = engine
            .upsert_milestone(
                view.id,
                serde_json::from_value(json!({ "id": milestone.id, "status": "approved" }))
                    .unwrap(),
                &actor,
                None,
            )
            .await
            .unwrap();
        assert_eq!(view.milestones[0].status, MilestoneStatus::Approved);
        assert_eq!(view.milestones[0].sequence, 1);

        // Unknown status on update keeps the previous value.
        let view = engine
            .upsert_milestone(
                view.id,
                serde_json::from_value(json!({ "id": milestone.id, "status": "bogus" })).unwrap(),
                &actor,
                None,
            )
            .await
            .unwrap();
        assert_eq!(view.milestones[0].status, MilestoneStatus::Approved);

        let view = engine
            .delete_milestone(view.id, milestone.id, &actor, None)
            .await
            .unwrap();
        assert!(view.milestones.is_empty());

        let err = engine
            .delete_milestone(view.id, milestone.id, &actor, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_milestone_upsert_unknown_id_fails() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        let view = engine
            .create(create_cmd("O1", json!(150)), &actor)
            .await
            .unwrap();

        let err = engine
            .upsert_milestone(
                view.id,
                serde_json::from_value(json!({ "id": Uuid::new_v4(), "label": "x" })).unwrap(),
                &actor,
                None,
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_note_add_and_idempotent_delete() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::new("admin-1");
        let view = engine
            .create(create_cmd("O1", json!(150)), &actor)
            .await
            .unwrap();

        let err = engine
            .add_note(
                view.id,
                NoteDraft {
                    body: Some("   ".into()),
                    ..Default::default()
                },
                &actor,
                None,
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let view = engine
            .add_note(
                view.id,
                NoteDraft {
                    body: Some("chased provider".into()),
                    ..Default::default()
                },
                &actor,
                None,
            )
            .await
            .unwrap();
        assert_eq!(view.notes.len(), 1);
        assert_eq!(view.notes[0].author_id, "admin-1");

        // Deleting a missing note id succeeds and leaves the rest alone.
        let view = engine
            .delete_note(view.id, Uuid::new_v4(), &actor, None)
            .await
            .unwrap();
        assert_eq!(view.notes.len(), 1);

        let note_id = view.notes[0].id;
        let view = engine
            .delete_note(view.id, note_id, &actor, None)
            .await
            .unwrap();
        assert!(view.notes.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_note_array_conventions() {
        let (engine, _) = engine_with_orders(&["O1"]);
        let actor = ActorContext::system();
        let view = engine
            .create(create_cmd("O1", json!(150)), &actor)
            .await
            .unwrap();
        let view = engine
            .add_note(
                view.id,
                NoteDraft {
                    body: Some("first".into()),
                    ..Default::default()
                },
                &actor,
                None,
            )
            .await
            .unwrap();
        let existing = view.notes[0].id;

        let patch: EscrowPatch = serde_json::from_value(json!({
            "notes": [
                { "id": existing, "pinned": true },
                { "id": Uuid::new_v4(), "body": "skipped: unknown id" },
                { "body": "second note", "author_id": "provider-7" },
                { "body": "   " }
            ]
        }))
        .unwrap();
        let view = engine.update(view.id, patch, &actor, None).await.unwrap();
        assert_eq!(view.notes.len(), 2);
        let pinned = view.notes.iter().find(|n| n.id == existing).unwrap();
        assert!(pinned.pinned);
        assert!(view.notes.iter().any(|n| n.author_id == "provider-7"));

        let patch: EscrowPatch = serde_json::from_value(json!({
            "notes": [{ "id": existing, "_delete": true }]
        }))
        .unwrap();
        let view = engine.update(view.id, patch, &actor, None).await.unwrap();
        assert_eq!(view.notes.len(), 1);
        assert_eq!(view.notes[0].body, "second note");
    }

    #[tokio::test]
    async fn test_scope_blocks_foreign_and_empty() {
        let (engine, directory) = engine_with_orders(&["O1"]);
        directory.register_order(OrderSummary {
            order_id: "O2".into(),
            provider_id: Some("p2".into()),
            company_id: Some("c2".into()),
            ..Default::default()
        });
        let actor = ActorContext::system();
        let own = engine
            .create(create_cmd("O1", json!(10)), &actor)
            .await
            .unwrap();
        let foreign = engine
            .create(create_cmd("O2", json!(10)), &actor)
            .await
            .unwrap();

        let scope = ProviderScope {
            provider_id: Some("p1".into()),
            company_ids: vec!["c1".into()],
        };
        assert!(engine.get(own.id, Some(&scope)).await.is_ok());
        let err = engine.get(foreign.id, Some(&scope)).await.unwrap_err();
        assert!(err.is_not_found());

        let empty = ProviderScope::default();
        let err = engine.get(own.id, Some(&empty)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
