//! The application-facing engine handle.
//!
//! [`Dms`] owns the single store handle and hands clones of it to the ledger,
//! the allocator and the outbox. Every write goes through here so that each
//! mutated record leaves exactly one outbox entry behind.

use crate::config::DmsConfig;
use crate::error::CoreResult;
use dms_ledger::{
    AccountAllocation, Consumption, CustomerOutstanding, FifoLedger, OutstandingAllocator,
    PostingReceipt,
};
use dms_storage::{
    InitReport, LocalStore, RecoverySupervisor, Store, StoreDiagnostics, StoreLifecycle,
};
use dms_sync::{DrainOutcome, Outbox, SyncHandle, Transport, create_sync_engine};
use dms_types::{
    Account, AccountId, AccountNode, AccountType, InvoiceDraft, InvoiceId, Money, NewAccount,
    NewProduct, NewStockLot, NewVoucher, Product, ProductId, Quantity, StockBalance, StockLot,
    SyncOperation, SyncStatus, Voucher, tables,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Dms {
    store: Arc<LocalStore>,
    shared: Arc<dyn Store>,
    supervisor: RecoverySupervisor<LocalStore>,
    ledger: FifoLedger,
    allocator: OutstandingAllocator,
    outbox: Arc<Outbox>,
    sync: SyncHandle,
    engine: Option<JoinHandle<()>>,
    init: InitReport,
}

impl Dms {
    /// Bring the local store up (recovering it if needed) and start the
    /// background sync engine.
    pub async fn open(config: DmsConfig, transport: Arc<dyn Transport>) -> CoreResult<Self> {
        config.validate()?;
        let store = Arc::new(match &config.storage.path {
            Some(path) => LocalStore::new(path),
            None => LocalStore::in_memory(),
        });

        let supervisor = RecoverySupervisor::new(Arc::clone(&store), config.storage.recovery());
        let init = supervisor.initialize().await?;
        info!(
            location = %store.location(),
            seeded = init.seeded,
            recreated = init.recreated,
            "local store ready"
        );

        let shared: Arc<dyn Store> = store.clone();
        let outbox = Arc::new(Outbox::new(Arc::clone(&shared), transport, config.sync.clone()));
        let (sync, engine) = create_sync_engine(Arc::clone(&outbox));
        let engine = tokio::spawn(engine.run());

        Ok(Self {
            ledger: FifoLedger::new(Arc::clone(&shared)),
            allocator: OutstandingAllocator::new(Arc::clone(&shared)),
            store,
            shared,
            supervisor,
            outbox,
            sync,
            engine: Some(engine),
            init,
        })
    }

    /// Stop the sync engine and release the database.
    pub async fn close(mut self) {
        if let Err(e) = self.sync.stop().await {
            warn!(error = %e, "sync engine already stopped");
        }
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.await {
                warn!(error = %e, "sync engine task ended abnormally");
            }
        }
        StoreLifecycle::close(self.store.as_ref());
        info!("DMS closed");
    }

    pub fn init_report(&self) -> InitReport {
        self.init
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.shared
    }

    pub fn ledger(&self) -> &FifoLedger {
        &self.ledger
    }

    pub fn allocator(&self) -> &OutstandingAllocator {
        &self.allocator
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn sync_handle(&self) -> &SyncHandle {
        &self.sync
    }

    async fn blocking<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&dyn Store) -> dms_storage::StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.shared);
        Ok(tokio::task::spawn_blocking(move || f(store.as_ref())).await??)
    }

    // ── Catalog ──

    pub async fn add_product(&self, product: NewProduct) -> CoreResult<Product> {
        let created = self.blocking(move |s| s.insert_product(&product)).await?;
        self.outbox
            .enqueue_record(tables::PRODUCTS, created.id.get(), SyncOperation::Insert, &created)
            .await;
        Ok(created)
    }

    pub async fn set_product_price(&self, id: ProductId, sale_price: Money) -> CoreResult<Product> {
        let updated = self.blocking(move |s| s.set_product_price(id, sale_price)).await?;
        self.outbox
            .enqueue_record(tables::PRODUCTS, id.get(), SyncOperation::Update, &updated)
            .await;
        Ok(updated)
    }

    pub async fn set_product_active(&self, id: ProductId, active: bool) -> CoreResult<Product> {
        let updated = self.blocking(move |s| s.set_product_active(id, active)).await?;
        self.outbox
            .enqueue_record(tables::PRODUCTS, id.get(), SyncOperation::Update, &updated)
            .await;
        Ok(updated)
    }

    pub async fn add_account(&self, account: NewAccount) -> CoreResult<Account> {
        let created = self.blocking(move |s| s.insert_account(&account)).await?;
        self.outbox
            .enqueue_record(tables::ACCOUNTS, created.id.get(), SyncOperation::Insert, &created)
            .await;
        Ok(created)
    }

    // ── Stock ──

    pub async fn add_stock(&self, lot: NewStockLot) -> CoreResult<StockLot> {
        let created = self.ledger.add_lot(lot).await?;
        self.outbox
            .enqueue_record(tables::STOCK_LOTS, created.id.get(), SyncOperation::Insert, &created)
            .await;
        Ok(created)
    }

    /// Take stock out FIFO outside of an invoice (write-offs, samples).
    pub async fn consume_stock(&self, product_id: ProductId, quantity: Quantity) -> CoreResult<Consumption> {
        let consumption = self.ledger.consume(product_id, quantity).await?;
        for lot in &consumption.lots {
            self.outbox
                .enqueue_record(tables::STOCK_LOTS, lot.id.get(), SyncOperation::Update, lot)
                .await;
        }
        Ok(consumption)
    }

    // ── Postings ──

    pub async fn post_sale(&self, draft: InvoiceDraft) -> CoreResult<PostingReceipt> {
        let receipt = self.ledger.post_sale(draft).await?;
        self.enqueue_posting(&receipt).await;
        Ok(receipt)
    }

    pub async fn post_sale_return(&self, draft: InvoiceDraft) -> CoreResult<PostingReceipt> {
        let receipt = self.ledger.post_sale_return(draft).await?;
        self.enqueue_posting(&receipt).await;
        Ok(receipt)
    }

    pub async fn post_purchase(&self, draft: InvoiceDraft) -> CoreResult<PostingReceipt> {
        let receipt = self.ledger.post_purchase(draft).await?;
        self.enqueue_posting(&receipt).await;
        Ok(receipt)
    }

    pub async fn post_purchase_return(&self, draft: InvoiceDraft) -> CoreResult<PostingReceipt> {
        let receipt = self.ledger.post_purchase_return(draft).await?;
        self.enqueue_posting(&receipt).await;
        Ok(receipt)
    }

    async fn enqueue_posting(&self, receipt: &PostingReceipt) {
        let posted = &receipt.posted;
        self.outbox
            .enqueue_record(tables::INVOICES, posted.invoice.id.get(), SyncOperation::Insert, &posted.invoice)
            .await;
        for line in &posted.lines {
            self.outbox
                .enqueue_record(tables::INVOICE_LINES, line.id.get(), SyncOperation::Insert, line)
                .await;
        }
        for lot in &posted.drained_lots {
            self.outbox
                .enqueue_record(tables::STOCK_LOTS, lot.id.get(), SyncOperation::Update, lot)
                .await;
        }
        for lot in &posted.new_lots {
            self.outbox
                .enqueue_record(tables::STOCK_LOTS, lot.id.get(), SyncOperation::Insert, lot)
                .await;
        }
    }

    pub async fn record_voucher(&self, voucher: NewVoucher) -> CoreResult<Voucher> {
        let created = self.ledger.record_voucher(voucher).await?;
        self.outbox
            .enqueue_record(tables::VOUCHERS, created.id.get(), SyncOperation::Insert, &created)
            .await;
        Ok(created)
    }

    // ── Queries ──

    pub async fn stock_balance(&self, product_id: ProductId) -> CoreResult<StockBalance> {
        Ok(self.ledger.balance(product_id).await?)
    }

    pub async fn products(&self, active_only: bool) -> CoreResult<Vec<Product>> {
        self.blocking(move |s| s.list_products(None, active_only)).await
    }

    pub async fn accounts(&self, acct_type: Option<AccountType>) -> CoreResult<Vec<Account>> {
        self.blocking(move |s| s.list_accounts(acct_type)).await
    }

    pub async fn chart_tree(&self) -> CoreResult<Vec<AccountNode>> {
        Ok(dms_ledger::chart_tree(&self.shared).await?)
    }

    pub async fn outstanding_for_customer(&self, account_id: AccountId) -> CoreResult<CustomerOutstanding> {
        Ok(self.allocator.outstanding_for_customer(account_id).await?)
    }

    pub async fn outstanding_for_invoice(&self, invoice_id: InvoiceId) -> CoreResult<Money> {
        Ok(self.allocator.outstanding_for_invoice(invoice_id).await?)
    }

    pub async fn account_allocation(&self, account_id: AccountId) -> CoreResult<AccountAllocation> {
        Ok(self.allocator.allocation_for_account(account_id).await?)
    }

    // ── Sync ──

    pub async fn sync_status(&self) -> CoreResult<SyncStatus> {
        Ok(self.outbox.status().await?)
    }

    /// Drain now and wait for the result. Returns
    /// [`DrainOutcome::AlreadyRunning`] when a drain is in flight.
    pub async fn force_sync_now(&self) -> CoreResult<DrainOutcome> {
        Ok(self.outbox.drain().await?)
    }

    pub async fn set_online(&self, online: bool) -> CoreResult<()> {
        Ok(self.sync.set_online(online).await?)
    }

    pub async fn retry_failed_sync(&self) -> CoreResult<u64> {
        Ok(self.outbox.retry_failed().await?)
    }

    pub async fn clear_failed_sync(&self) -> CoreResult<u64> {
        Ok(self.outbox.clear_failed().await?)
    }

    // ── Maintenance ──

    pub async fn export(&self) -> CoreResult<serde_json::Value> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.export_json()).await??)
    }

    pub fn diagnostics(&self) -> StoreDiagnostics {
        self.store.diagnostics()
    }

    /// Delete every local record and start from freshly seeded storage.
    /// Undelivered outbox entries are lost.
    pub async fn reset_local_storage(&self) -> CoreResult<InitReport> {
        warn!(location = %self.store.location(), "resetting local storage");
        Ok(self.supervisor.recreate().await?)
    }
}
