use crate::domain::escrow::Escrow;
use crate::domain::ports::{
    EscrowFilter, EscrowStore, PolicyRowStore, ProviderPolicyRow, SettingsStore,
};
use crate::domain::scope::ProviderScope;
use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Column Family for escrow aggregates, keyed by escrow id.
pub const CF_ESCROWS: &str = "escrows";
/// Column Family mapping order id to escrow id, backing the 1:1 invariant.
pub const CF_ORDER_INDEX: &str = "order_index";
/// Column Family for JSON settings documents.
pub const CF_SETTINGS: &str = "settings";
/// Column Family for provider-scoped policy rows, keyed by policy id.
pub const CF_PROVIDER_POLICIES: &str = "provider_policies";

/// A persistent store implementation using RocksDB.
///
/// One database serves the `EscrowStore`, `SettingsStore`, and
/// `PolicyRowStore` ports through separate Column Families with JSON values.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// all required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_ESCROWS, CF_ORDER_INDEX, CF_SETTINGS, CF_PROVIDER_POLICIES]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EscrowError::internal(std::io::Error::other(format!(
                "column family '{name}' not found"
            )))
        })
    }

    fn write_escrow(&self, escrow: &Escrow) -> Result<()> {
        let escrows = self.cf(CF_ESCROWS)?;
        let index = self.cf(CF_ORDER_INDEX)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(escrows, escrow.id.as_bytes(), serde_json::to_vec(escrow)?);
        batch.put_cf(index, escrow.order_id.as_bytes(), escrow.id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl EscrowStore for RocksDBStore {
    async fn insert(&self, escrow: Escrow) -> Result<()> {
        let index = self.cf(CF_ORDER_INDEX)?;
        if self
            .db
            .get_pinned_cf(index, escrow.order_id.as_bytes())?
            .is_some()
        {
            return Err(EscrowError::validation(format!(
                "an escrow already exists for order '{}'",
                escrow.order_id
            )));
        }
        self.write_escrow(&escrow)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Escrow>> {
        let cf = self.cf(CF_ESCROWS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_order(&self, order_id: &str) -> Result<Option<Escrow>> {
        let index = self.cf(CF_ORDER_INDEX)?;
        let Some(id_bytes) = self.db.get_cf(index, order_id.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&id_bytes).map_err(EscrowError::internal)?;
        EscrowStore::get(self, id).await
    }

    async fn save(&self, escrow: Escrow) -> Result<()> {
        self.write_escrow(&escrow)
    }

    async fn select(&self, filter: &EscrowFilter) -> Result<Vec<Escrow>> {
        let cf = self.cf(CF_ESCROWS)?;
        let mut escrows = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            let escrow: Escrow = serde_json::from_slice(&value)?;
            if filter.matches(&escrow) {
                escrows.push(escrow);
            }
        }
        Ok(escrows)
    }
}

#[async_trait]
impl SettingsStore for RocksDBStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let cf = self.cf(CF_SETTINGS)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let cf = self.cf(CF_SETTINGS)?;
        self.db.put_cf(cf, key.as_bytes(), serde_json::to_vec(&value)?)?;
        Ok(())
    }
}

#[async_trait]
impl PolicyRowStore for RocksDBStore {
    async fn list_matching(&self, scope: &ProviderScope) -> Result<Vec<ProviderPolicyRow>> {
        let cf = self.cf(CF_PROVIDER_POLICIES)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            let row: ProviderPolicyRow = serde_json::from_slice(&value)?;
            if row.visible_to(scope) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderPolicyRow>> {
        let cf = self.cf(CF_PROVIDER_POLICIES)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, row: ProviderPolicyRow) -> Result<()> {
        let cf = self.cf(CF_PROVIDER_POLICIES)?;
        self.db
            .put_cf(cf, row.policy.id.as_bytes(), serde_json::to_vec(&row)?)?;
        Ok(())
    }

    async fn save(&self, row: ProviderPolicyRow) -> Result<()> {
        PolicyRowStore::insert(self, row).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let cf = self.cf(CF_PROVIDER_POLICIES)?;
        let exists = self.db.get_pinned_cf(cf, id.as_bytes())?.is_some();
        if exists {
            self.db.delete_cf(cf, id.as_bytes())?;
        }
        Ok(exists)
    }
}
