//! In-memory [`Store`] used by unit tests and by callers that need a
//! throwaway store without SQLite.
//!
//! Behaves like [`crate::LocalStore`] for every observable rule: ids are
//! allocated monotonically, drains are all-or-nothing, synced outbox entries
//! are terminal and writes refresh `updated_at`.

use crate::error::{StorageError, StorageResult};
use crate::store::{PostedInvoice, Posting, SeedData, Store, StoreDiagnostics, StoreLifecycle};
use crate::validate;
use dms_types::{
    Account, AccountId, AccountType, AppConfigEntry, CompanyId, Invoice, InvoiceId, InvoiceKind,
    InvoiceLine, InvoiceLineId, LotDrain, LotId, Money, NewAccount, NewProduct, NewStockLot,
    NewSyncItem, NewVoucher, Product, ProductId, Stamps, StockLot, SyncItemId, SyncQueueItem,
    SyncState, Voucher, VoucherId, config_keys, now_millis, tables,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Rows that carry [`Stamps`].
trait Stamped {
    fn stamps_mut(&mut self) -> &mut Stamps;
}

macro_rules! stamped {
    ($($ty:ty),*) => {
        $(impl Stamped for $ty {
            fn stamps_mut(&mut self) -> &mut Stamps {
                &mut self.stamps
            }
        })*
    };
}

stamped!(Product, StockLot, Invoice, InvoiceLine, Voucher, Account);

/// Refresh `updated_at` on a monitored row after a write.
fn touch<T: Stamped>(row: &mut T) {
    let now = now_millis();
    let stamps = row.stamps_mut();
    stamps.updated_at = now.max(stamps.updated_at);
}

#[derive(Clone, Default)]
struct Tables {
    next_id: i64,
    products: BTreeMap<i64, Product>,
    lots: BTreeMap<i64, StockLot>,
    invoices: BTreeMap<i64, Invoice>,
    lines: BTreeMap<i64, InvoiceLine>,
    vouchers: BTreeMap<i64, Voucher>,
    accounts: BTreeMap<i64, Account>,
    sync_queue: BTreeMap<i64, SyncQueueItem>,
    config: BTreeMap<String, AppConfigEntry>,
}

impl Tables {
    fn alloc(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_lot(&mut self, lot: &NewStockLot) -> StorageResult<StockLot> {
        validate::lot(lot)?;
        let id = self.alloc();
        let row = StockLot {
            id: LotId(id),
            product_id: lot.product_id,
            initial_quantity: lot.quantity,
            remaining: lot.quantity,
            unit_cost: lot.unit_cost,
            batch_no: lot.batch_no.clone(),
            expiry: lot.expiry,
            received_at: lot.received_at,
            stamps: Stamps::at(now_millis()),
        };
        self.lots.insert(id, row.clone());
        Ok(row)
    }

    fn apply_drains(&mut self, drains: &[LotDrain]) -> StorageResult<Vec<StockLot>> {
        let mut updated = Vec::with_capacity(drains.len());
        for drain in drains {
            if drain.after < Decimal::ZERO || drain.after > drain.before {
                return Err(StorageError::Validation(format!(
                    "invalid drain of lot {}: {} -> {}",
                    drain.lot_id, drain.before, drain.after
                )));
            }
            let lot = self
                .lots
                .get_mut(&drain.lot_id.get())
                .ok_or_else(|| StorageError::NotFound(format!("stock lot {}", drain.lot_id)))?;
            if lot.product_id != drain.product_id || lot.remaining != drain.before {
                return Err(StorageError::Conflict(format!(
                    "stock lot {} holds {}, expected {}",
                    drain.lot_id, lot.remaining, drain.before
                )));
            }
            lot.remaining = drain.after;
            touch(lot);
            updated.push(lot.clone());
        }
        Ok(updated)
    }

    fn insert_account(&mut self, account: &NewAccount) -> StorageResult<Account> {
        validate::account(account)?;
        let id = self.alloc();
        let row = Account {
            id: AccountId(id),
            acct_type: account.acct_type,
            name: account.name.clone(),
            route_id: account.route_id,
            parent_id: account.parent_id,
            opening_balance: account.opening_balance,
            credit_limit: account.credit_limit,
            address: account.address.clone(),
            phone: account.phone.clone(),
            stamps: Stamps::at(now_millis()),
        };
        self.accounts.insert(id, row.clone());
        Ok(row)
    }

    fn config_set(&mut self, key: &str, value: &str, description: Option<&str>) {
        let now = now_millis();
        let entry = self
            .config
            .entry(key.to_string())
            .or_insert_with(|| AppConfigEntry {
                key: key.to_string(),
                value: String::new(),
                description: None,
                updated_at: now,
            });
        entry.value = value.to_string();
        if let Some(description) = description {
            entry.description = Some(description.to_string());
        }
        entry.updated_at = now;
    }
}

/// Thread-safe in-memory store.
pub struct MemoryStore {
    open: Mutex<bool>,
    tables: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An open, empty store.
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
            tables: Mutex::new(Tables::default()),
        }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Tables>> {
        if !self.is_open() {
            return Err(StorageError::Closed);
        }
        Ok(self.tables.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Run `f` on a scratch copy and publish it only on success.
    fn transact<T>(&self, f: impl FnOnce(&mut Tables) -> StorageResult<T>) -> StorageResult<T> {
        let mut guard = self.lock()?;
        let mut scratch = guard.clone();
        let out = f(&mut scratch)?;
        *guard = scratch;
        Ok(out)
    }

    fn open_flag(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl StoreLifecycle for MemoryStore {
    fn open(&self) -> StorageResult<()> {
        *self.open_flag() = true;
        Ok(())
    }

    fn close(&self) {
        *self.open_flag() = false;
    }

    fn destroy(&self) -> StorageResult<()> {
        self.close();
        *self.tables.lock().unwrap_or_else(|p| p.into_inner()) = Tables::default();
        Ok(())
    }

    fn is_open(&self) -> bool {
        *self.open_flag()
    }

    fn diagnostics(&self) -> StoreDiagnostics {
        let t = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        StoreDiagnostics {
            location: ":memory-store:".to_string(),
            is_open: self.is_open(),
            schema_generation: t
                .config
                .get(config_keys::SCHEMA_GENERATION)
                .and_then(|e| e.value.parse().ok()),
            table_counts: vec![
                (tables::PRODUCTS.to_string(), t.products.len() as u64),
                (tables::STOCK_LOTS.to_string(), t.lots.len() as u64),
                (tables::INVOICES.to_string(), t.invoices.len() as u64),
                (tables::INVOICE_LINES.to_string(), t.lines.len() as u64),
                (tables::VOUCHERS.to_string(), t.vouchers.len() as u64),
                (tables::ACCOUNTS.to_string(), t.accounts.len() as u64),
                (tables::SYNC_QUEUE.to_string(), t.sync_queue.len() as u64),
                (tables::APP_CONFIG.to_string(), t.config.len() as u64),
            ],
        }
    }
}

fn by_date_then_id<'a, T: 'a>(
    rows: impl Iterator<Item = &'a T>,
    key: impl Fn(&T) -> (chrono::NaiveDate, i64),
) -> Vec<T>
where
    T: Clone,
{
    let mut out: Vec<T> = rows.cloned().collect();
    out.sort_by_key(|row| key(row));
    out
}

impl Store for MemoryStore {
    fn insert_product(&self, product: &NewProduct) -> StorageResult<Product> {
        validate::product(product)?;
        let mut t = self.lock()?;
        if t.products.values().any(|p| p.code == product.code) {
            return Err(StorageError::Validation(format!(
                "product code {:?} already exists",
                product.code
            )));
        }
        let id = t.alloc();
        let row = Product {
            id: ProductId(id),
            code: product.code.clone(),
            name: product.name.clone(),
            company_id: product.company_id,
            sale_price: product.sale_price,
            pack_size: product.pack_size,
            active: true,
            stamps: Stamps::at(now_millis()),
        };
        t.products.insert(id, row.clone());
        Ok(row)
    }

    fn get_product(&self, id: ProductId) -> StorageResult<Option<Product>> {
        Ok(self.lock()?.products.get(&id.get()).cloned())
    }

    fn list_products(
        &self,
        company_id: Option<CompanyId>,
        active_only: bool,
    ) -> StorageResult<Vec<Product>> {
        let t = self.lock()?;
        let mut rows: Vec<Product> = t
            .products
            .values()
            .filter(|p| company_id.is_none_or(|c| p.company_id == c))
            .filter(|p| !active_only || p.active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn set_product_price(&self, id: ProductId, sale_price: Money) -> StorageResult<Product> {
        validate::price(sale_price)?;
        let mut t = self.lock()?;
        let row = t
            .products
            .get_mut(&id.get())
            .ok_or_else(|| StorageError::NotFound(format!("product {id}")))?;
        row.sale_price = sale_price;
        touch(row);
        Ok(row.clone())
    }

    fn set_product_active(&self, id: ProductId, active: bool) -> StorageResult<Product> {
        let mut t = self.lock()?;
        let row = t
            .products
            .get_mut(&id.get())
            .ok_or_else(|| StorageError::NotFound(format!("product {id}")))?;
        row.active = active;
        touch(row);
        Ok(row.clone())
    }

    fn insert_lot(&self, lot: &NewStockLot) -> StorageResult<StockLot> {
        self.lock()?.insert_lot(lot)
    }

    fn get_lot(&self, id: LotId) -> StorageResult<Option<StockLot>> {
        Ok(self.lock()?.lots.get(&id.get()).cloned())
    }

    fn lots_for_product(&self, product_id: ProductId) -> StorageResult<Vec<StockLot>> {
        let t = self.lock()?;
        let mut rows: Vec<StockLot> = t
            .lots
            .values()
            .filter(|l| l.product_id == product_id)
            .cloned()
            .collect();
        rows.sort_by_key(|l| (l.received_at, l.id));
        Ok(rows)
    }

    fn apply_drains(&self, drains: &[LotDrain]) -> StorageResult<Vec<StockLot>> {
        self.transact(|t| t.apply_drains(drains))
    }

    fn commit_posting(&self, posting: &Posting) -> StorageResult<PostedInvoice> {
        self.transact(|t| {
            let header = &posting.invoice;
            let now = now_millis();
            let id = t.alloc();
            let invoice = Invoice {
                id: InvoiceId(id),
                kind: header.kind,
                date: header.date,
                account_id: header.account_id,
                route_id: header.route_id,
                salesman_id: header.salesman_id,
                reference_no: header.reference_no.clone(),
                is_cash: header.is_cash,
                amount: header.totals.amount,
                discount: header.totals.discount,
                tax: header.totals.tax,
                net_amount: header.totals.net_amount,
                notes: header.notes.clone(),
                sync_status: SyncState::Pending,
                stamps: Stamps::at(now),
            };
            t.invoices.insert(id, invoice.clone());

            let mut lines = Vec::with_capacity(posting.lines.len());
            for line in &posting.lines {
                let line_id = t.alloc();
                let row = InvoiceLine {
                    id: InvoiceLineId(line_id),
                    invoice_id: invoice.id,
                    product_id: line.product_id,
                    quantity: line.quantity,
                    rate: line.rate,
                    discount: line.discount,
                    tax: line.tax,
                    net_amount: line.net_amount,
                    stamps: Stamps::at(now),
                };
                t.lines.insert(line_id, row.clone());
                lines.push(row);
            }

            let drained_lots = t.apply_drains(&posting.drains)?;
            let new_lots = posting
                .new_lots
                .iter()
                .map(|lot| t.insert_lot(lot))
                .collect::<StorageResult<Vec<_>>>()?;

            Ok(PostedInvoice {
                invoice,
                lines,
                drained_lots,
                new_lots,
            })
        })
    }

    fn get_invoice(&self, id: InvoiceId) -> StorageResult<Option<Invoice>> {
        Ok(self.lock()?.invoices.get(&id.get()).cloned())
    }

    fn invoice_lines(&self, id: InvoiceId) -> StorageResult<Vec<InvoiceLine>> {
        Ok(self
            .lock()?
            .lines
            .values()
            .filter(|l| l.invoice_id == id)
            .cloned()
            .collect())
    }

    fn invoices_for_account(
        &self,
        account_id: AccountId,
        kinds: &[InvoiceKind],
    ) -> StorageResult<Vec<Invoice>> {
        let t = self.lock()?;
        Ok(by_date_then_id(
            t.invoices
                .values()
                .filter(|i| i.account_id == account_id && kinds.contains(&i.kind)),
            |i| (i.date, i.id.get()),
        ))
    }

    fn insert_voucher(&self, voucher: &NewVoucher) -> StorageResult<Voucher> {
        validate::voucher(voucher)?;
        let mut t = self.lock()?;
        let id = t.alloc();
        let row = Voucher {
            id: VoucherId(id),
            date: voucher.date,
            account_id: voucher.account_id,
            description: voucher.description.clone(),
            debit: voucher.debit,
            credit: voucher.credit,
            voucher_type: voucher.voucher_type,
            reference_no: voucher.reference_no.clone(),
            sync_status: SyncState::Pending,
            stamps: Stamps::at(now_millis()),
        };
        t.vouchers.insert(id, row.clone());
        Ok(row)
    }

    fn get_voucher(&self, id: VoucherId) -> StorageResult<Option<Voucher>> {
        Ok(self.lock()?.vouchers.get(&id.get()).cloned())
    }

    fn vouchers_for_account(&self, account_id: AccountId) -> StorageResult<Vec<Voucher>> {
        let t = self.lock()?;
        Ok(by_date_then_id(
            t.vouchers.values().filter(|v| v.account_id == account_id),
            |v| (v.date, v.id.get()),
        ))
    }

    fn insert_account(&self, account: &NewAccount) -> StorageResult<Account> {
        self.lock()?.insert_account(account)
    }

    fn get_account(&self, id: AccountId) -> StorageResult<Option<Account>> {
        Ok(self.lock()?.accounts.get(&id.get()).cloned())
    }

    fn list_accounts(&self, acct_type: Option<AccountType>) -> StorageResult<Vec<Account>> {
        let t = self.lock()?;
        let mut rows: Vec<Account> = t
            .accounts
            .values()
            .filter(|a| acct_type.is_none_or(|ty| a.acct_type == ty))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn set_record_sync_status(
        &self,
        table: &str,
        record_id: i64,
        status: SyncState,
    ) -> StorageResult<bool> {
        let mut t = self.lock()?;
        match table {
            tables::INVOICES => Ok(t
                .invoices
                .get_mut(&record_id)
                .map(|row| {
                    row.sync_status = status;
                    touch(row);
                })
                .is_some()),
            tables::VOUCHERS => Ok(t
                .vouchers
                .get_mut(&record_id)
                .map(|row| {
                    row.sync_status = status;
                    touch(row);
                })
                .is_some()),
            _ => Ok(false),
        }
    }

    fn enqueue_sync_item(&self, item: &NewSyncItem) -> StorageResult<SyncQueueItem> {
        let mut t = self.lock()?;
        let id = t.alloc();
        let row = SyncQueueItem {
            id: SyncItemId(id),
            table_name: item.table_name.clone(),
            record_id: item.record_id,
            operation: item.operation,
            payload: item.payload.clone(),
            status: SyncState::Pending,
            retry_count: 0,
            last_attempt: None,
            created_at: now_millis(),
            idempotency_key: Uuid::now_v7(),
        };
        t.sync_queue.insert(id, row.clone());
        Ok(row)
    }

    fn get_sync_item(&self, id: SyncItemId) -> StorageResult<Option<SyncQueueItem>> {
        Ok(self.lock()?.sync_queue.get(&id.get()).cloned())
    }

    fn sync_items_due(&self, max_retries: u32) -> StorageResult<Vec<SyncQueueItem>> {
        let t = self.lock()?;
        let mut rows: Vec<SyncQueueItem> = t
            .sync_queue
            .values()
            .filter(|i| match i.status {
                SyncState::Pending => true,
                SyncState::Failed => i.retry_count < max_retries,
                SyncState::Synced => false,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|i| (i.created_at, i.id));
        Ok(rows)
    }

    fn mark_sync_item_synced(&self, id: SyncItemId, at: i64) -> StorageResult<bool> {
        let mut t = self.lock()?;
        match t.sync_queue.get_mut(&id.get()) {
            Some(item) if item.status != SyncState::Synced => {
                item.status = SyncState::Synced;
                item.last_attempt = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn record_sync_failure(
        &self,
        id: SyncItemId,
        at: i64,
        max_retries: u32,
    ) -> StorageResult<Option<SyncQueueItem>> {
        let mut t = self.lock()?;
        match t.sync_queue.get_mut(&id.get()) {
            Some(item) if item.status != SyncState::Synced => {
                item.retry_count = item.retry_count.saturating_add(1);
                item.status = if item.retry_count >= max_retries {
                    SyncState::Failed
                } else {
                    SyncState::Pending
                };
                item.last_attempt = Some(at);
                Ok(Some(item.clone()))
            }
            _ => Ok(None),
        }
    }

    fn reset_failed_sync_items(&self) -> StorageResult<u64> {
        let mut t = self.lock()?;
        let mut n = 0;
        for item in t.sync_queue.values_mut().filter(|i| i.status == SyncState::Failed) {
            item.status = SyncState::Pending;
            item.retry_count = 0;
            n += 1;
        }
        Ok(n)
    }

    fn delete_failed_sync_items(&self) -> StorageResult<u64> {
        let mut t = self.lock()?;
        let before = t.sync_queue.len();
        t.sync_queue.retain(|_, i| i.status != SyncState::Failed);
        Ok((before - t.sync_queue.len()) as u64)
    }

    fn purge_synced_before(&self, cutoff: i64) -> StorageResult<u64> {
        let mut t = self.lock()?;
        let before = t.sync_queue.len();
        t.sync_queue
            .retain(|_, i| !(i.status == SyncState::Synced && i.created_at < cutoff));
        Ok((before - t.sync_queue.len()) as u64)
    }

    fn count_sync_items(&self, status: SyncState) -> StorageResult<u64> {
        Ok(self
            .lock()?
            .sync_queue
            .values()
            .filter(|i| i.status == status)
            .count() as u64)
    }

    fn config_get(&self, key: &str) -> StorageResult<Option<AppConfigEntry>> {
        Ok(self.lock()?.config.get(key).cloned())
    }

    fn config_set(&self, key: &str, value: &str, description: Option<&str>) -> StorageResult<()> {
        self.lock()?.config_set(key, value, description);
        Ok(())
    }

    fn seed_defaults(&self, seed: &SeedData) -> StorageResult<bool> {
        self.transact(|t| {
            if t.config.contains_key(config_keys::DB_INITIALIZED) {
                return Ok(false);
            }
            for account in &seed.accounts {
                t.insert_account(account)?;
            }
            t.config_set(config_keys::APP_VERSION, &seed.app_version, Some("Application version"));
            t.config_set(config_keys::DB_INITIALIZED, "true", Some("Seed data written"));
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lot(product: i64, qty: Decimal) -> NewStockLot {
        NewStockLot {
            product_id: ProductId(product),
            quantity: qty,
            unit_cost: dec!(1),
            batch_no: None,
            expiry: None,
            received_at: 0,
        }
    }

    #[test]
    fn failed_transaction_leaves_tables_untouched() {
        let store = MemoryStore::new();
        let a = store.insert_lot(&lot(1, dec!(10))).unwrap();
        let drains = [
            LotDrain {
                lot_id: a.id,
                product_id: a.product_id,
                before: dec!(10),
                after: dec!(0),
            },
            LotDrain {
                lot_id: LotId(999),
                product_id: a.product_id,
                before: dec!(5),
                after: dec!(0),
            },
        ];

        assert!(store.apply_drains(&drains).is_err());
        assert_eq!(store.get_lot(a.id).unwrap().unwrap().remaining, dec!(10));
    }

    #[test]
    fn closed_store_refuses_access() {
        let store = MemoryStore::new();
        store.close();
        assert!(matches!(store.get_lot(LotId(1)), Err(StorageError::Closed)));
        store.open().unwrap();
        assert!(store.get_lot(LotId(1)).unwrap().is_none());
    }

    #[test]
    fn touch_never_moves_updated_at_backwards() {
        let mut product = Product {
            id: ProductId(1),
            code: "P".into(),
            name: "P".into(),
            company_id: CompanyId(1),
            sale_price: dec!(1),
            pack_size: 1,
            active: true,
            stamps: Stamps::at(i64::MAX),
        };
        touch(&mut product);
        assert_eq!(product.stamps.updated_at, i64::MAX);
    }
}
