//! Storage capability traits.
//!
//! [`Store`] is the table-access surface the ledger, allocator and outbox are
//! written against. [`StoreLifecycle`] is the open/close/destroy surface the
//! recovery path drives. Both are implemented by [`crate::LocalStore`] and by
//! the in-memory [`crate::MemoryStore`].

use crate::error::StorageResult;
use dms_types::{
    Account, AccountId, AccountType, AppConfigEntry, CompanyId, Invoice, InvoiceId, InvoiceKind,
    InvoiceLine, LotDrain, LotId, Money, NewAccount, NewInvoice, NewInvoiceLine, NewProduct,
    NewStockLot, NewSyncItem, NewVoucher, Product, ProductId, StockLot, SyncItemId,
    SyncQueueItem, SyncState, Voucher, VoucherId,
};
use serde::{Deserialize, Serialize};

/// Everything one invoice posting writes, applied in a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub invoice: NewInvoice,
    pub lines: Vec<NewInvoiceLine>,
    pub drains: Vec<LotDrain>,
    pub new_lots: Vec<NewStockLot>,
}

/// Rows produced by a committed [`Posting`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedInvoice {
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLine>,
    pub drained_lots: Vec<StockLot>,
    pub new_lots: Vec<StockLot>,
}

/// Rows written on first initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedData {
    pub app_version: String,
    pub accounts: Vec<NewAccount>,
}

impl Default for SeedData {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            accounts: vec![
                NewAccount::named(AccountType::Customer, "Cash Customer"),
                NewAccount::named(AccountType::Expense, "Travel Expense"),
                NewAccount::named(AccountType::Expense, "Fuel Expense"),
                NewAccount::named(AccountType::Income, "Sales Revenue"),
            ],
        }
    }
}

/// Point-in-time description of the store, logged when opening fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDiagnostics {
    pub location: String,
    pub is_open: bool,
    pub schema_generation: Option<u32>,
    pub table_counts: Vec<(String, u64)>,
}

/// Open/close/destroy control over the physical database.
pub trait StoreLifecycle: Send + Sync {
    /// Open the database and register the schema. Idempotent while open.
    fn open(&self) -> StorageResult<()>;

    /// Drop the live handle. A no-op when already closed.
    fn close(&self);

    /// Close and delete the physical database.
    fn destroy(&self) -> StorageResult<()>;

    fn is_open(&self) -> bool;

    fn diagnostics(&self) -> StoreDiagnostics;
}

/// Table access over the local store.
///
/// Every method is synchronous; async callers wrap calls in
/// `tokio::task::spawn_blocking`.
pub trait Store: Send + Sync {
    // ── Products ──

    fn insert_product(&self, product: &NewProduct) -> StorageResult<Product>;

    fn get_product(&self, id: ProductId) -> StorageResult<Option<Product>>;

    fn list_products(
        &self,
        company_id: Option<CompanyId>,
        active_only: bool,
    ) -> StorageResult<Vec<Product>>;

    fn set_product_price(&self, id: ProductId, sale_price: Money) -> StorageResult<Product>;

    fn set_product_active(&self, id: ProductId, active: bool) -> StorageResult<Product>;

    // ── Stock lots ──

    fn insert_lot(&self, lot: &NewStockLot) -> StorageResult<StockLot>;

    fn get_lot(&self, id: LotId) -> StorageResult<Option<StockLot>>;

    /// All lots of a product, drained ones included, oldest first.
    fn lots_for_product(&self, product_id: ProductId) -> StorageResult<Vec<StockLot>>;

    /// Apply every drain or none. A lot whose `remaining` no longer matches
    /// `before` aborts the batch with [`crate::StorageError::Conflict`].
    fn apply_drains(&self, drains: &[LotDrain]) -> StorageResult<Vec<StockLot>>;

    // ── Invoices ──

    /// Insert header, lines and lot changes in one transaction.
    fn commit_posting(&self, posting: &Posting) -> StorageResult<PostedInvoice>;

    fn get_invoice(&self, id: InvoiceId) -> StorageResult<Option<Invoice>>;

    fn invoice_lines(&self, id: InvoiceId) -> StorageResult<Vec<InvoiceLine>>;

    /// Invoices of the given kinds for one account, by `(date, id)`.
    fn invoices_for_account(
        &self,
        account_id: AccountId,
        kinds: &[InvoiceKind],
    ) -> StorageResult<Vec<Invoice>>;

    // ── Vouchers ──

    fn insert_voucher(&self, voucher: &NewVoucher) -> StorageResult<Voucher>;

    fn get_voucher(&self, id: VoucherId) -> StorageResult<Option<Voucher>>;

    /// Vouchers of one account, by `(date, id)`.
    fn vouchers_for_account(&self, account_id: AccountId) -> StorageResult<Vec<Voucher>>;

    // ── Accounts ──

    fn insert_account(&self, account: &NewAccount) -> StorageResult<Account>;

    fn get_account(&self, id: AccountId) -> StorageResult<Option<Account>>;

    fn list_accounts(&self, acct_type: Option<AccountType>) -> StorageResult<Vec<Account>>;

    // ── Sync bookkeeping ──

    /// Flip the `sync_status` of an invoice or voucher row. Returns false for
    /// tables without a sync status and for missing rows.
    fn set_record_sync_status(
        &self,
        table: &str,
        record_id: i64,
        status: SyncState,
    ) -> StorageResult<bool>;

    fn enqueue_sync_item(&self, item: &NewSyncItem) -> StorageResult<SyncQueueItem>;

    fn get_sync_item(&self, id: SyncItemId) -> StorageResult<Option<SyncQueueItem>>;

    /// Pending entries plus failed entries still under `max_retries`, oldest
    /// first.
    fn sync_items_due(&self, max_retries: u32) -> StorageResult<Vec<SyncQueueItem>>;

    /// Mark an entry synced. Returns false if it was already synced.
    fn mark_sync_item_synced(&self, id: SyncItemId, at: i64) -> StorageResult<bool>;

    /// Count a failed attempt. The entry becomes `Failed` once its retry
    /// count reaches `max_retries`, `Pending` otherwise. Synced entries are
    /// left alone and yield `None`.
    fn record_sync_failure(
        &self,
        id: SyncItemId,
        at: i64,
        max_retries: u32,
    ) -> StorageResult<Option<SyncQueueItem>>;

    /// Reset failed entries to pending with a fresh retry budget.
    fn reset_failed_sync_items(&self) -> StorageResult<u64>;

    fn delete_failed_sync_items(&self) -> StorageResult<u64>;

    /// Delete synced entries created before `cutoff` (ms since epoch).
    fn purge_synced_before(&self, cutoff: i64) -> StorageResult<u64>;

    fn count_sync_items(&self, status: SyncState) -> StorageResult<u64>;

    // ── App config ──

    fn config_get(&self, key: &str) -> StorageResult<Option<AppConfigEntry>>;

    fn config_set(&self, key: &str, value: &str, description: Option<&str>) -> StorageResult<()>;

    /// Write the seed rows and initialization markers in one transaction,
    /// unless the `db_initialized` marker is already present. Returns true
    /// when seeding happened.
    fn seed_defaults(&self, seed: &SeedData) -> StorageResult<bool>;
}
