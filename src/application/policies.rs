//! Release policy registries.
//!
//! Two backends sit behind one `ReleasePolicyRepository` contract: the
//! platform-wide registry stored inside the escrow settings document, and the
//! provider-scoped registry stored as individual rows with ownership columns.

use crate::domain::policy::{EscrowSettings, PolicyDraft, ReleasePolicy, slugify, uniquify_id};
use crate::domain::ports::{
    ESCROW_SETTINGS_KEY, PolicyRowStoreRef, ProviderPolicyRow, ReleasePolicyRepository,
    SettingsStoreRef,
};
use crate::domain::scope::{ActorContext, ProviderScope};
use crate::error::{EscrowError, Result};
use async_trait::async_trait;

/// Platform-wide policies, persisted as part of the escrow settings document.
///
/// Every mutation is a whole-document read-modify-write with no concurrency
/// token: two concurrent admin writers last-write-win on the entire settings
/// document. The scope argument is ignored; this is the back-office path.
pub struct PlatformPolicyRegistry {
    settings: SettingsStoreRef,
}

impl PlatformPolicyRegistry {
    pub fn new(settings: SettingsStoreRef) -> Self {
        Self { settings }
    }

    /// Loads the settings document, tolerating a missing or partial one.
    pub async fn load_settings(&self) -> Result<EscrowSettings> {
        match self.settings.get(ESCROW_SETTINGS_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(EscrowSettings::default()),
        }
    }

    async fn save_settings(&self, settings: &EscrowSettings) -> Result<()> {
        self.settings
            .set(ESCROW_SETTINGS_KEY, serde_json::to_value(settings)?)
            .await
    }

    /// Routes a draft by its id: an explicit id must match an existing entry
    /// (not-found otherwise), no id means create.
    pub async fn upsert(&self, draft: PolicyDraft, actor: &ActorContext) -> Result<ReleasePolicy> {
        match draft.id.clone() {
            Some(id) if !id.trim().is_empty() => {
                self.update(None, id.trim(), draft, actor).await
            }
            _ => self.create(None, draft, actor).await,
        }
    }

    fn new_policy_id(name: &str, existing: &[ReleasePolicy]) -> String {
        let ids: Vec<String> = existing.iter().map(|p| p.id.clone()).collect();
        let base = slugify(name);
        // Names with no alphanumeric content slug to nothing.
        let base = if base.is_empty() {
            format!("policy-{}", existing.len() + 1)
        } else {
            base
        };
        uniquify_id(&base, &ids)
    }
}

#[async_trait]
impl ReleasePolicyRepository for PlatformPolicyRegistry {
    async fn list(&self, _scope: Option<&ProviderScope>) -> Result<Vec<ReleasePolicy>> {
        Ok(self.load_settings().await?.policies)
    }

    async fn create(
        &self,
        _scope: Option<&ProviderScope>,
        draft: PolicyDraft,
        actor: &ActorContext,
    ) -> Result<ReleasePolicy> {
        let name = draft
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| EscrowError::validation("policy name is required"))?
            .to_string();

        let mut settings = self.load_settings().await?;
        let id = Self::new_policy_id(&name, &settings.policies);

        let mut policy = ReleasePolicy {
            id,
            name,
            ..Default::default()
        };
        policy.merge_draft(&draft);

        settings.policies.push(policy.clone());
        self.save_settings(&settings).await?;
        tracing::info!(policy = %policy.id, actor = %actor.actor_id, "created release policy");
        Ok(policy)
    }

    async fn update(
        &self,
        _scope: Option<&ProviderScope>,
        id: &str,
        draft: PolicyDraft,
        actor: &ActorContext,
    ) -> Result<ReleasePolicy> {
        let mut settings = self.load_settings().await?;
        let policy = settings
            .policies
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| EscrowError::not_found(format!("release policy '{id}' not found")))?;

        policy.merge_draft(&draft);
        let updated = policy.clone();

        self.save_settings(&settings).await?;
        tracing::info!(policy = %id, actor = %actor.actor_id, "updated release policy");
        Ok(updated)
    }

    async fn delete(&self, _scope: Option<&ProviderScope>, id: &str) -> Result<()> {
        let mut settings = self.load_settings().await?;
        let before = settings.policies.len();
        settings.policies.retain(|p| p.id != id);
        if settings.policies.len() == before {
            return Err(EscrowError::not_found(format!(
                "release policy '{id}' not found"
            )));
        }
        self.save_settings(&settings).await?;
        tracing::info!(policy = %id, "deleted release policy");
        Ok(())
    }
}

/// Provider-owned policies stored as individual rows. Every call is bounded
/// by the caller's scope; an empty scope sees nothing and may create nothing.
pub struct ProviderPolicyRegistry {
    rows: PolicyRowStoreRef,
}

impl ProviderPolicyRegistry {
    pub fn new(rows: PolicyRowStoreRef) -> Self {
        Self { rows }
    }

    fn require_scope(scope: Option<&ProviderScope>) -> Result<&ProviderScope> {
        scope
            .filter(|s| !s.is_empty())
            .ok_or_else(|| EscrowError::validation("a provider scope is required"))
    }

    async fn unique_row_id(&self, base: &str) -> Result<String> {
        if self.rows.get(base).await?.is_none() {
            return Ok(base.to_string());
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}-{n}");
            if self.rows.get(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

#[async_trait]
impl ReleasePolicyRepository for ProviderPolicyRegistry {
    async fn list(&self, scope: Option<&ProviderScope>) -> Result<Vec<ReleasePolicy>> {
        let Some(scope) = scope.filter(|s| !s.is_empty()) else {
            return Ok(Vec::new());
        };
        let rows = self.rows.list_matching(scope).await?;
        Ok(rows.into_iter().map(|r| r.policy).collect())
    }

    async fn create(
        &self,
        scope: Option<&ProviderScope>,
        draft: PolicyDraft,
        actor: &ActorContext,
    ) -> Result<ReleasePolicy> {
        let scope = Self::require_scope(scope)?;
        let name = draft
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| EscrowError::validation("policy name is required"))?
            .to_string();

        let base = slugify(&name);
        let base = if base.is_empty() { "policy".to_string() } else { base };
        let id = self.unique_row_id(&base).await?;

        let mut policy = ReleasePolicy {
            id,
            name,
            ..Default::default()
        };
        policy.merge_draft(&draft);

        let row = ProviderPolicyRow {
            policy: policy.clone(),
            provider_id: scope.provider_id.clone(),
            company_id: scope.company_ids.first().cloned(),
        };
        self.rows.insert(row).await?;
        tracing::info!(policy = %policy.id, actor = %actor.actor_id, "created provider policy");
        Ok(policy)
    }

    async fn update(
        &self,
        scope: Option<&ProviderScope>,
        id: &str,
        draft: PolicyDraft,
        actor: &ActorContext,
    ) -> Result<ReleasePolicy> {
        let scope = Self::require_scope(scope)?;
        let mut row = self
            .rows
            .get(id)
            .await?
            .filter(|r| r.visible_to(scope))
            .ok_or_else(|| EscrowError::not_found(format!("release policy '{id}' not found")))?;

        row.policy.merge_draft(&draft);
        let updated = row.policy.clone();
        self.rows.save(row).await?;
        tracing::info!(policy = %id, actor = %actor.actor_id, "updated provider policy");
        Ok(updated)
    }

    async fn delete(&self, scope: Option<&ProviderScope>, id: &str) -> Result<()> {
        let scope = Self::require_scope(scope)?;
        let visible = self
            .rows
            .get(id)
            .await?
            .is_some_and(|r| r.visible_to(scope));
        if !visible || !self.rows.delete(id).await? {
            return Err(EscrowError::not_found(format!(
                "release policy '{id}' not found"
            )));
        }
        tracing::info!(policy = %id, "deleted provider policy");
        Ok(())
    }
}
