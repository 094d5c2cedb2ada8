//! SQLite-backed local store.
//!
//! One connection per store, guarded by a mutex and held in an `Option` so
//! the recovery path can close and replace it without handing out stale
//! handles. Components share the store through `Arc<LocalStore>`.

mod accounts;
mod app_config;
pub(crate) mod codec;
mod invoices;
mod lots;
mod products;
mod sync_queue;
mod vouchers;

use crate::error::{StorageError, StorageResult};
use crate::schema::{self, initialize_schema};
use crate::store::{PostedInvoice, Posting, SeedData, Store, StoreDiagnostics, StoreLifecycle};
use crate::{delete_database_files, open_sqlite_with_wal_recovery};
use dms_types::{
    Account, AccountId, AccountType, AppConfigEntry, CompanyId, Invoice, InvoiceId, InvoiceKind,
    InvoiceLine, LotDrain, LotId, Money, NewAccount, NewProduct, NewStockLot, NewSyncItem,
    NewVoucher, Product, ProductId, StockLot, SyncItemId, SyncQueueItem, SyncState, Voucher,
    VoucherId, tables,
};
use rusqlite::{Connection, ErrorCode};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory => f.write_str(":memory:"),
        }
    }
}

/// Every table exported by [`LocalStore::export_json`].
const EXPORT_TABLES: &[&str] = &[
    tables::PRODUCTS,
    tables::STOCK_LOTS,
    tables::INVOICES,
    tables::INVOICE_LINES,
    tables::VOUCHERS,
    tables::ACCOUNTS,
    tables::SYNC_QUEUE,
    tables::APP_CONFIG,
];

pub struct LocalStore {
    location: StoreLocation,
    conn: Mutex<Option<Connection>>,
}

impl LocalStore {
    /// Create a closed store for a database file. Nothing touches disk until
    /// [`StoreLifecycle::open`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            conn: Mutex::new(None),
        }
    }

    /// Create a closed in-memory store.
    pub fn in_memory() -> Self {
        Self {
            location: StoreLocation::Memory,
            conn: Mutex::new(None),
        }
    }

    /// Open a file-backed store right away.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let store = Self::new(path);
        StoreLifecycle::open(&store)?;
        Ok(store)
    }

    /// Open an in-memory store right away.
    pub fn open_in_memory() -> StorageResult<Self> {
        let store = Self::in_memory();
        StoreLifecycle::open(&store)?;
        Ok(store)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            StoreLocation::File(path) => Some(path),
            StoreLocation::Memory => None,
        }
    }

    /// Acquire the connection lock, recovering from poison if a prior holder panicked.
    fn lock_conn(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let guard = self.lock_conn();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        f(conn)
    }

    /// Run `f` in a transaction; any error rolls the whole unit back.
    fn with_tx<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let mut guard = self.lock_conn();
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;
        let tx = conn.transaction()?;
        let out = f(&*tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Dump every table as `{ table: [row, ...] }`.
    pub fn export_json(&self) -> StorageResult<serde_json::Value> {
        self.with_conn(|conn| {
            let mut out = serde_json::Map::new();
            for table in EXPORT_TABLES {
                let mut stmt = conn.prepare(&format!("SELECT * FROM {table} ORDER BY id"))?;
                let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
                let rows = stmt
                    .query_map([], |row| {
                        let mut obj = serde_json::Map::new();
                        for (idx, name) in names.iter().enumerate() {
                            obj.insert(name.clone(), codec::value_to_json(row.get_ref(idx)?));
                        }
                        Ok(serde_json::Value::Object(obj))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                out.insert(table.to_string(), serde_json::Value::Array(rows));
            }
            Ok(serde_json::Value::Object(out))
        })
    }

    fn table_counts(conn: &Connection) -> Vec<(String, u64)> {
        EXPORT_TABLES
            .iter()
            .filter_map(|table| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get::<_, i64>(0))
                    .ok()
                    .map(|n| (table.to_string(), n.max(0) as u64))
            })
            .collect()
    }
}

/// Turn a uniqueness violation into a validation error.
pub(crate) fn unique_violation(err: rusqlite::Error, message: String) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StorageError::Validation(message)
        }
        _ => err.into(),
    }
}

impl StoreLifecycle for LocalStore {
    fn open(&self) -> StorageResult<()> {
        let mut guard = self.lock_conn();
        if guard.is_some() {
            return Ok(());
        }

        let conn = match &self.location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                open_sqlite_with_wal_recovery(path)?
            }
            StoreLocation::Memory => Connection::open_in_memory()?,
        };
        initialize_schema(&conn)?;
        *guard = Some(conn);
        info!(location = %self.location, "local database opened");
        Ok(())
    }

    fn close(&self) {
        if let Some(conn) = self.lock_conn().take() {
            if let Err((_, err)) = conn.close() {
                warn!(location = %self.location, error = %err, "error closing local database");
            }
            debug!(location = %self.location, "local database closed");
        }
    }

    fn destroy(&self) -> StorageResult<()> {
        self.close();
        if let StoreLocation::File(path) = &self.location {
            delete_database_files(path)?;
        }
        info!(location = %self.location, "local database deleted");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock_conn().is_some()
    }

    fn diagnostics(&self) -> StoreDiagnostics {
        let guard = self.lock_conn();
        match guard.as_ref() {
            Some(conn) => StoreDiagnostics {
                location: self.location.to_string(),
                is_open: true,
                schema_generation: schema::stored_generation(conn).ok().flatten(),
                table_counts: Self::table_counts(conn),
            },
            None => StoreDiagnostics {
                location: self.location.to_string(),
                is_open: false,
                ..StoreDiagnostics::default()
            },
        }
    }
}

impl Store for LocalStore {
    fn insert_product(&self, product: &NewProduct) -> StorageResult<Product> {
        self.with_conn(|conn| products::insert(conn, product))
    }

    fn get_product(&self, id: ProductId) -> StorageResult<Option<Product>> {
        self.with_conn(|conn| products::get(conn, id))
    }

    fn list_products(
        &self,
        company_id: Option<CompanyId>,
        active_only: bool,
    ) -> StorageResult<Vec<Product>> {
        self.with_conn(|conn| products::list(conn, company_id, active_only))
    }

    fn set_product_price(&self, id: ProductId, sale_price: Money) -> StorageResult<Product> {
        self.with_conn(|conn| products::set_price(conn, id, sale_price))
    }

    fn set_product_active(&self, id: ProductId, active: bool) -> StorageResult<Product> {
        self.with_conn(|conn| products::set_active(conn, id, active))
    }

    fn insert_lot(&self, lot: &NewStockLot) -> StorageResult<StockLot> {
        self.with_conn(|conn| lots::insert(conn, lot))
    }

    fn get_lot(&self, id: LotId) -> StorageResult<Option<StockLot>> {
        self.with_conn(|conn| lots::get(conn, id))
    }

    fn lots_for_product(&self, product_id: ProductId) -> StorageResult<Vec<StockLot>> {
        self.with_conn(|conn| lots::for_product(conn, product_id))
    }

    fn apply_drains(&self, drains: &[LotDrain]) -> StorageResult<Vec<StockLot>> {
        self.with_tx(|conn| lots::apply_drains(conn, drains))
    }

    fn commit_posting(&self, posting: &Posting) -> StorageResult<PostedInvoice> {
        self.with_tx(|conn| invoices::commit_posting(conn, posting))
    }

    fn get_invoice(&self, id: InvoiceId) -> StorageResult<Option<Invoice>> {
        self.with_conn(|conn| invoices::get(conn, id))
    }

    fn invoice_lines(&self, id: InvoiceId) -> StorageResult<Vec<InvoiceLine>> {
        self.with_conn(|conn| invoices::lines(conn, id))
    }

    fn invoices_for_account(
        &self,
        account_id: AccountId,
        kinds: &[InvoiceKind],
    ) -> StorageResult<Vec<Invoice>> {
        self.with_conn(|conn| invoices::for_account(conn, account_id, kinds))
    }

    fn insert_voucher(&self, voucher: &NewVoucher) -> StorageResult<Voucher> {
        self.with_conn(|conn| vouchers::insert(conn, voucher))
    }

    fn get_voucher(&self, id: VoucherId) -> StorageResult<Option<Voucher>> {
        self.with_conn(|conn| vouchers::get(conn, id))
    }

    fn vouchers_for_account(&self, account_id: AccountId) -> StorageResult<Vec<Voucher>> {
        self.with_conn(|conn| vouchers::for_account(conn, account_id))
    }

    fn insert_account(&self, account: &NewAccount) -> StorageResult<Account> {
        self.with_conn(|conn| accounts::insert(conn, account))
    }

    fn get_account(&self, id: AccountId) -> StorageResult<Option<Account>> {
        self.with_conn(|conn| accounts::get(conn, id))
    }

    fn list_accounts(&self, acct_type: Option<AccountType>) -> StorageResult<Vec<Account>> {
        self.with_conn(|conn| accounts::list(conn, acct_type))
    }

    fn set_record_sync_status(
        &self,
        table: &str,
        record_id: i64,
        status: SyncState,
    ) -> StorageResult<bool> {
        self.with_conn(|conn| sync_queue::set_record_status(conn, table, record_id, status))
    }

    fn enqueue_sync_item(&self, item: &NewSyncItem) -> StorageResult<SyncQueueItem> {
        self.with_conn(|conn| sync_queue::enqueue(conn, item))
    }

    fn get_sync_item(&self, id: SyncItemId) -> StorageResult<Option<SyncQueueItem>> {
        self.with_conn(|conn| sync_queue::get(conn, id))
    }

    fn sync_items_due(&self, max_retries: u32) -> StorageResult<Vec<SyncQueueItem>> {
        self.with_conn(|conn| sync_queue::due(conn, max_retries))
    }

    fn mark_sync_item_synced(&self, id: SyncItemId, at: i64) -> StorageResult<bool> {
        self.with_conn(|conn| sync_queue::mark_synced(conn, id, at))
    }

    fn record_sync_failure(
        &self,
        id: SyncItemId,
        at: i64,
        max_retries: u32,
    ) -> StorageResult<Option<SyncQueueItem>> {
        self.with_tx(|conn| sync_queue::record_failure(conn, id, at, max_retries))
    }

    fn reset_failed_sync_items(&self) -> StorageResult<u64> {
        self.with_conn(sync_queue::reset_failed)
    }

    fn delete_failed_sync_items(&self) -> StorageResult<u64> {
        self.with_conn(sync_queue::delete_failed)
    }

    fn purge_synced_before(&self, cutoff: i64) -> StorageResult<u64> {
        self.with_conn(|conn| sync_queue::purge_synced_before(conn, cutoff))
    }

    fn count_sync_items(&self, status: SyncState) -> StorageResult<u64> {
        self.with_conn(|conn| sync_queue::count(conn, status))
    }

    fn config_get(&self, key: &str) -> StorageResult<Option<AppConfigEntry>> {
        self.with_conn(|conn| app_config::get(conn, key))
    }

    fn config_set(&self, key: &str, value: &str, description: Option<&str>) -> StorageResult<()> {
        self.with_conn(|conn| app_config::set(conn, key, value, description))
    }

    fn seed_defaults(&self, seed: &SeedData) -> StorageResult<bool> {
        self.with_tx(|conn| app_config::seed(conn, seed))
    }
}
