use crate::domain::escrow::Escrow;
use crate::domain::ports::{
    EscrowFilter, EscrowStore, OrderDirectory, OrderSummary, PolicyRowStore, ProviderPolicyRow,
    SettingsStore,
};
use crate::domain::scope::ProviderScope;
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory escrow store.
///
/// Keeps a secondary order-id index alongside the primary map so the
/// one-escrow-per-order invariant holds under the same lock that admits the
/// insert. Ideal for tests and the seed-import CLI.
#[derive(Default, Clone)]
pub struct InMemoryEscrowStore {
    inner: Arc<RwLock<EscrowMaps>>,
}

#[derive(Default)]
struct EscrowMaps {
    escrows: HashMap<Uuid, Escrow>,
    by_order: HashMap<String, Uuid>,
}

impl InMemoryEscrowStore {
    /// Creates a new, empty in-memory escrow store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscrowStore for InMemoryEscrowStore {
    async fn insert(&self, escrow: Escrow) -> Result<()> {
        let mut maps = self.inner.write().await;
        if maps.by_order.contains_key(&escrow.order_id) {
            return Err(EscrowError::validation(format!(
                "an escrow already exists for order '{}'",
                escrow.order_id
            )));
        }
        maps.by_order.insert(escrow.order_id.clone(), escrow.id);
        maps.escrows.insert(escrow.id, escrow);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Escrow>> {
        let maps = self.inner.read().await;
        Ok(maps.escrows.get(&id).cloned())
    }

    async fn find_by_order(&self, order_id: &str) -> Result<Option<Escrow>> {
        let maps = self.inner.read().await;
        Ok(maps
            .by_order
            .get(order_id)
            .and_then(|id| maps.escrows.get(id))
            .cloned())
    }

    async fn save(&self, escrow: Escrow) -> Result<()> {
        let mut maps = self.inner.write().await;
        maps.by_order.insert(escrow.order_id.clone(), escrow.id);
        maps.escrows.insert(escrow.id, escrow);
        Ok(())
    }

    async fn select(&self, filter: &EscrowFilter) -> Result<Vec<Escrow>> {
        let maps = self.inner.read().await;
        Ok(maps
            .escrows
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }
}

/// In-memory order/service read-model.
///
/// Registration happens from synchronous setup code (tests, the CSV seed
/// import), so this one uses `std::sync::RwLock` rather than the async lock.
#[derive(Default, Clone)]
pub struct InMemoryOrderDirectory {
    orders: Arc<std::sync::RwLock<HashMap<String, OrderSummary>>>,
    ownership: Arc<std::sync::RwLock<HashMap<String, Vec<String>>>>,
}

impl InMemoryOrderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_order(&self, summary: OrderSummary) {
        let mut orders = self.orders.write().unwrap_or_else(|e| e.into_inner());
        orders.insert(summary.order_id.clone(), summary);
    }

    pub fn register_ownership(&self, owner_id: &str, company_ids: &[&str]) {
        let mut ownership = self.ownership.write().unwrap_or_else(|e| e.into_inner());
        ownership.insert(
            owner_id.to_string(),
            company_ids.iter().map(|c| c.to_string()).collect(),
        );
    }
}

#[async_trait]
impl OrderDirectory for InMemoryOrderDirectory {
    async fn order_exists(&self, order_id: &str) -> Result<bool> {
        let orders = self.orders.read().unwrap_or_else(|e| e.into_inner());
        Ok(orders.contains_key(order_id))
    }

    async fn order_summary(&self, order_id: &str) -> Result<Option<OrderSummary>> {
        let orders = self.orders.read().unwrap_or_else(|e| e.into_inner());
        Ok(orders.get(order_id).cloned())
    }

    async fn companies_owned_by(&self, user_id: &str) -> Result<Vec<String>> {
        let ownership = self.ownership.read().unwrap_or_else(|e| e.into_inner());
        Ok(ownership.get(user_id).cloned().unwrap_or_default())
    }
}

/// In-memory key/value document store for the escrow settings.
#[derive(Default, Clone)]
pub struct InMemorySettingsStore {
    documents: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let documents = self.documents.read().await;
        Ok(documents.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut documents = self.documents.write().await;
        documents.insert(key.to_string(), value);
        Ok(())
    }
}

/// In-memory provider policy row store keyed by policy id.
#[derive(Default, Clone)]
pub struct InMemoryPolicyRowStore {
    rows: Arc<RwLock<HashMap<String, ProviderPolicyRow>>>,
}

impl InMemoryPolicyRowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyRowStore for InMemoryPolicyRowStore {
    async fn list_matching(&self, scope: &ProviderScope) -> Result<Vec<ProviderPolicyRow>> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|r| r.visible_to(scope)).cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderPolicyRow>> {
        let rows = self.rows.read().await;
        Ok(rows.get(id).cloned())
    }

    async fn insert(&self, row: ProviderPolicyRow) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.insert(row.policy.id.clone(), row);
        Ok(())
    }

    async fn save(&self, row: ProviderPolicyRow) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.insert(row.policy.id.clone(), row);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut rows = self.rows.write().await;
        Ok(rows.remove(id).is_some())
    }
}
