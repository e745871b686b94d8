//! Storage and read-model ports. The engine and aggregator only ever see
//! these traits; in-memory and RocksDB implementations live under
//! `infrastructure`.

use crate::domain::escrow::{Escrow, EscrowStatus};
use crate::domain::policy::{PolicyDraft, ReleasePolicy};
use crate::domain::scope::{ActorContext, ProviderScope};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub type EscrowStoreRef = Arc<dyn EscrowStore>;
pub type OrderDirectoryRef = Arc<dyn OrderDirectory>;
pub type SettingsStoreRef = Arc<dyn SettingsStore>;
pub type PolicyRowStoreRef = Arc<dyn PolicyRowStore>;

/// Structural escrow filters, AND-composed. Free-text search is applied on
/// top by the query aggregator because it needs order joins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EscrowFilter {
    pub status: Option<EscrowStatus>,
    pub policy_id: Option<String>,
    pub on_hold: Option<bool>,
}

impl EscrowFilter {
    pub fn matches(&self, escrow: &Escrow) -> bool {
        if let Some(status) = self.status
            && escrow.status != status
        {
            return false;
        }
        if let Some(policy_id) = &self.policy_id
            && escrow.policy_id.as_deref() != Some(policy_id.as_str())
        {
            return false;
        }
        if let Some(on_hold) = self.on_hold
            && escrow.on_hold != on_hold
        {
            return false;
        }
        true
    }
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Inserts a new escrow. Rejects a second escrow for the same order so
    /// the one-per-order invariant holds even if two creates race past the
    /// engine's pre-check.
    async fn insert(&self, escrow: Escrow) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Escrow>>;
    async fn find_by_order(&self, order_id: &str) -> Result<Option<Escrow>>;
    /// Persists the whole aggregate (escrow + milestones + notes) at once.
    async fn save(&self, escrow: Escrow) -> Result<()>;
    /// All escrows matching the structural filter, unordered.
    async fn select(&self, filter: &EscrowFilter) -> Result<Vec<Escrow>>;
}

/// Buyer/service/provider linkage for one order, as supplied by the
/// order/service read-model. Used for hydration, search joins, and scoping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrderSummary {
    pub order_id: String,
    pub buyer_id: String,
    pub buyer_name: String,
    pub service_id: String,
    pub service_title: String,
    pub provider_id: Option<String>,
    pub company_id: Option<String>,
    pub region: Option<String>,
    pub disputes: Vec<DisputeSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeSummary {
    pub id: String,
    pub status: String,
    pub opened_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrderDirectory: Send + Sync {
    async fn order_exists(&self, order_id: &str) -> Result<bool>;
    async fn order_summary(&self, order_id: &str) -> Result<Option<OrderSummary>>;
    /// Company ids owned by the given user, for scope resolution.
    async fn companies_owned_by(&self, user_id: &str) -> Result<Vec<String>>;
}

/// Key under which the escrow settings document lives.
pub const ESCROW_SETTINGS_KEY: &str = "escrow_settings";

/// Key/value JSON document store. Whole-document read-modify-write with no
/// concurrency token: two concurrent writers last-write-win on the entire
/// document, which is the documented behaviour of the policy registry.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// A provider-scoped policy row: the normalized policy plus its ownership
/// columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPolicyRow {
    pub policy: ReleasePolicy,
    pub provider_id: Option<String>,
    pub company_id: Option<String>,
}

impl ProviderPolicyRow {
    pub fn visible_to(&self, scope: &ProviderScope) -> bool {
        scope.covers(self.provider_id.as_deref(), self.company_id.as_deref())
    }
}

#[async_trait]
pub trait PolicyRowStore: Send + Sync {
    async fn list_matching(&self, scope: &ProviderScope) -> Result<Vec<ProviderPolicyRow>>;
    async fn get(&self, id: &str) -> Result<Option<ProviderPolicyRow>>;
    async fn insert(&self, row: ProviderPolicyRow) -> Result<()>;
    async fn save(&self, row: ProviderPolicyRow) -> Result<()>;
    /// Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// One logical contract over both policy registries (platform document and
/// provider-scoped rows). The platform flavor ignores the scope argument;
/// the provider flavor requires a non-empty one.
#[async_trait]
pub trait ReleasePolicyRepository: Send + Sync {
    async fn list(&self, scope: Option<&ProviderScope>) -> Result<Vec<ReleasePolicy>>;
    async fn create(
        &self,
        scope: Option<&ProviderScope>,
        draft: PolicyDraft,
        actor: &ActorContext,
    ) -> Result<ReleasePolicy>;
    async fn update(
        &self,
        scope: Option<&ProviderScope>,
        id: &str,
        draft: PolicyDraft,
        actor: &ActorContext,
    ) -> Result<ReleasePolicy>;
    async fn delete(&self, scope: Option<&ProviderScope>, id: &str) -> Result<()>;
}
