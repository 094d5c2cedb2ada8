use chrono::NaiveDate;
use dms_storage::{
    LocalStore, MemoryStore, Posting, SeedData, StorageError, Store, StoreLifecycle,
};
use dms_types::{
    AccountId, AccountType, CompanyId, InvoiceKind, InvoiceTotals, LotDrain, NewAccount, NewInvoice,
    NewInvoiceLine, NewProduct, NewStockLot, NewSyncItem, NewVoucher, ProductId, SyncOperation,
    SyncState, config_keys, tables,
};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn stores() -> Vec<(&'static str, Box<dyn Store>)> {
    vec![
        ("sqlite", Box::new(LocalStore::open_in_memory().unwrap()) as Box<dyn Store>),
        ("memory", Box::new(MemoryStore::new()) as Box<dyn Store>),
    ]
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
}

fn new_lot(product: ProductId, qty: Decimal, cost: Decimal, received_at: i64) -> NewStockLot {
    NewStockLot {
        product_id: product,
        quantity: qty,
        unit_cost: cost,
        batch_no: Some(format!("B-{received_at}")),
        expiry: None,
        received_at,
    }
}

fn new_product(code: &str) -> NewProduct {
    NewProduct {
        code: code.into(),
        name: format!("Product {code}"),
        company_id: CompanyId(1),
        sale_price: dec!(15.50),
        pack_size: 12,
    }
}

// ── Products ─────────────────────────────────────────────────────

#[test]
fn product_insert_get_and_update() {
    for (name, store) in stores() {
        let p = store.insert_product(&new_product("SKU-1")).unwrap();
        assert!(p.active, "{name}");
        assert_eq!(p.sale_price, dec!(15.50), "{name}");

        let updated = store.set_product_price(p.id, dec!(17)).unwrap();
        assert_eq!(updated.sale_price, dec!(17), "{name}");
        assert!(updated.stamps.updated_at >= p.stamps.updated_at, "{name}");

        let inactive = store.set_product_active(p.id, false).unwrap();
        assert!(!inactive.active, "{name}");
        assert!(store.list_products(None, true).unwrap().is_empty(), "{name}");
        assert_eq!(store.list_products(Some(CompanyId(1)), false).unwrap().len(), 1, "{name}");
    }
}

#[test]
fn duplicate_product_code_is_rejected() {
    for (name, store) in stores() {
        store.insert_product(&new_product("DUP")).unwrap();
        let err = store.insert_product(&new_product("DUP")).unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)), "{name}: {err}");
    }
}

#[test]
fn updating_missing_product_is_not_found() {
    for (name, store) in stores() {
        let err = store.set_product_price(ProductId(404), dec!(1)).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)), "{name}: {err}");
    }
}

// ── Stock lots ───────────────────────────────────────────────────

#[test]
fn lots_come_back_oldest_first() {
    for (name, store) in stores() {
        let product = ProductId(1);
        let late = store.insert_lot(&new_lot(product, dec!(5), dec!(12), 200)).unwrap();
        let early = store.insert_lot(&new_lot(product, dec!(5), dec!(10), 100)).unwrap();
        let tie = store.insert_lot(&new_lot(product, dec!(5), dec!(11), 100)).unwrap();

        let ids: Vec<_> = store.lots_for_product(product).unwrap().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![early.id, tie.id, late.id], "{name}");
    }
}

#[test]
fn lot_validation() {
    for (name, store) in stores() {
        let zero = store.insert_lot(&new_lot(ProductId(1), dec!(0), dec!(1), 1));
        assert!(matches!(zero, Err(StorageError::Validation(_))), "{name}");
        let negative_cost = store.insert_lot(&new_lot(ProductId(1), dec!(1), dec!(-1), 1));
        assert!(matches!(negative_cost, Err(StorageError::Validation(_))), "{name}");
    }
}

#[test]
fn stale_drain_rolls_back_the_batch() {
    for (name, store) in stores() {
        let product = ProductId(3);
        let a = store.insert_lot(&new_lot(product, dec!(10), dec!(1), 1)).unwrap();
        let b = store.insert_lot(&new_lot(product, dec!(10), dec!(1), 2)).unwrap();

        let drains = [
            LotDrain { lot_id: a.id, product_id: product, before: dec!(10), after: dec!(0) },
            LotDrain { lot_id: b.id, product_id: product, before: dec!(7), after: dec!(5) },
        ];
        let err = store.apply_drains(&drains).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)), "{name}: {err}");
        assert_eq!(store.get_lot(a.id).unwrap().unwrap().remaining, dec!(10), "{name}");
        assert_eq!(store.get_lot(b.id).unwrap().unwrap().remaining, dec!(10), "{name}");
    }
}

#[test]
fn drained_lot_keeps_its_row() {
    for (name, store) in stores() {
        let lot = store.insert_lot(&new_lot(ProductId(4), dec!(2.5), dec!(3), 1)).unwrap();
        let drains = [LotDrain {
            lot_id: lot.id,
            product_id: lot.product_id,
            before: dec!(2.5),
            after: dec!(0),
        }];
        let updated = store.apply_drains(&drains).unwrap();
        assert!(updated[0].is_drained(), "{name}");
        assert_eq!(updated[0].initial_quantity, dec!(2.5), "{name}");
        assert_eq!(store.lots_for_product(lot.product_id).unwrap().len(), 1, "{name}");
    }
}

// ── Postings ─────────────────────────────────────────────────────

fn sale_posting(account: i64, drains: Vec<LotDrain>) -> Posting {
    Posting {
        invoice: NewInvoice {
            kind: InvoiceKind::Sale,
            date: date(5),
            account_id: AccountId(account),
            route_id: None,
            salesman_id: None,
            reference_no: Some("INV-1".into()),
            is_cash: false,
            totals: InvoiceTotals {
                amount: dec!(50),
                discount: dec!(0),
                tax: dec!(0),
                net_amount: dec!(50),
            },
            notes: None,
        },
        lines: vec![NewInvoiceLine {
            product_id: ProductId(9),
            quantity: dec!(5),
            rate: dec!(10),
            discount: dec!(0),
            tax: dec!(0),
            net_amount: dec!(50),
        }],
        drains,
        new_lots: vec![],
    }
}

#[test]
fn posting_writes_header_lines_and_drains_together() {
    for (name, store) in stores() {
        let lot = store.insert_lot(&new_lot(ProductId(9), dec!(8), dec!(4), 1)).unwrap();
        let drains = vec![LotDrain {
            lot_id: lot.id,
            product_id: lot.product_id,
            before: dec!(8),
            after: dec!(3),
        }];

        let posted = store.commit_posting(&sale_posting(7, drains)).unwrap();
        assert_eq!(posted.invoice.sync_status, SyncState::Pending, "{name}");
        assert_eq!(posted.lines.len(), 1, "{name}");
        assert_eq!(posted.drained_lots[0].remaining, dec!(3), "{name}");

        let lines = store.invoice_lines(posted.invoice.id).unwrap();
        assert_eq!(lines[0].net_amount, dec!(50), "{name}");
        let sales = store.invoices_for_account(AccountId(7), &[InvoiceKind::Sale]).unwrap();
        assert_eq!(sales.len(), 1, "{name}");
        assert!(store.invoices_for_account(AccountId(7), &[InvoiceKind::Purchase]).unwrap().is_empty());
    }
}

#[test]
fn failed_posting_leaves_no_invoice() {
    for (name, store) in stores() {
        let lot = store.insert_lot(&new_lot(ProductId(9), dec!(8), dec!(4), 1)).unwrap();
        let stale = vec![LotDrain {
            lot_id: lot.id,
            product_id: lot.product_id,
            before: dec!(6),
            after: dec!(1),
        }];

        assert!(store.commit_posting(&sale_posting(7, stale)).is_err(), "{name}");
        assert!(store.invoices_for_account(AccountId(7), &[InvoiceKind::Sale]).unwrap().is_empty(), "{name}");
        assert_eq!(store.get_lot(lot.id).unwrap().unwrap().remaining, dec!(8), "{name}");
    }
}

// ── Vouchers & accounts ──────────────────────────────────────────

#[test]
fn voucher_needs_exactly_one_side() {
    for (name, store) in stores() {
        let mut both = NewVoucher::receipt(date(1), AccountId(1), dec!(10));
        both.debit = dec!(10);
        assert!(matches!(store.insert_voucher(&both), Err(StorageError::Validation(_))), "{name}");

        let ok = store.insert_voucher(&NewVoucher::receipt(date(1), AccountId(1), dec!(10))).unwrap();
        assert_eq!(ok.credit, dec!(10), "{name}");
        assert_eq!(store.vouchers_for_account(AccountId(1)).unwrap().len(), 1, "{name}");
    }
}

#[test]
fn vouchers_list_by_date_then_id() {
    for (name, store) in stores() {
        let later = store.insert_voucher(&NewVoucher::receipt(date(9), AccountId(2), dec!(1))).unwrap();
        let earlier = store.insert_voucher(&NewVoucher::receipt(date(3), AccountId(2), dec!(1))).unwrap();
        let ids: Vec<_> = store.vouchers_for_account(AccountId(2)).unwrap().iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![earlier.id, later.id], "{name}");
    }
}

#[test]
fn accounts_filter_by_type() {
    for (name, store) in stores() {
        store.insert_account(&NewAccount::named(AccountType::Customer, "Zed Traders")).unwrap();
        store.insert_account(&NewAccount::named(AccountType::Supplier, "Acme")).unwrap();
        let customers = store.list_accounts(Some(AccountType::Customer)).unwrap();
        assert_eq!(customers.len(), 1, "{name}");
        assert_eq!(customers[0].name, "Zed Traders", "{name}");
        assert_eq!(store.list_accounts(None).unwrap().len(), 2, "{name}");
    }
}

// ── Sync queue ───────────────────────────────────────────────────

fn item(record: i64) -> NewSyncItem {
    NewSyncItem::new(tables::INVOICES, record, SyncOperation::Insert, serde_json::json!({ "id": record }))
}

#[test]
fn failure_accounting_reaches_failed_at_the_limit() {
    for (name, store) in stores() {
        let queued = store.enqueue_sync_item(&item(1)).unwrap();
        assert_eq!(queued.status, SyncState::Pending, "{name}");

        let first = store.record_sync_failure(queued.id, 10, 3).unwrap().unwrap();
        assert_eq!((first.status, first.retry_count), (SyncState::Pending, 1), "{name}");
        store.record_sync_failure(queued.id, 11, 3).unwrap();
        let third = store.record_sync_failure(queued.id, 12, 3).unwrap().unwrap();
        assert_eq!((third.status, third.retry_count), (SyncState::Failed, 3), "{name}");
        assert_eq!(third.last_attempt, Some(12), "{name}");

        assert!(store.sync_items_due(3).unwrap().is_empty(), "{name}");
        assert_eq!(store.count_sync_items(SyncState::Failed).unwrap(), 1, "{name}");
    }
}

#[test]
fn synced_is_terminal() {
    for (name, store) in stores() {
        let queued = store.enqueue_sync_item(&item(1)).unwrap();
        assert!(store.mark_sync_item_synced(queued.id, 5).unwrap(), "{name}");
        assert!(!store.mark_sync_item_synced(queued.id, 6).unwrap(), "{name}");
        assert!(store.record_sync_failure(queued.id, 7, 3).unwrap().is_none(), "{name}");

        let row = store.get_sync_item(queued.id).unwrap().unwrap();
        assert_eq!(row.status, SyncState::Synced, "{name}");
        assert_eq!(row.last_attempt, Some(5), "{name}");
        assert_eq!(row.payload, queued.payload, "{name}");
        assert_eq!(row.idempotency_key, queued.idempotency_key, "{name}");
    }
}

#[test]
fn reset_and_clear_failed_items() {
    for (name, store) in stores() {
        let a = store.enqueue_sync_item(&item(1)).unwrap();
        let b = store.enqueue_sync_item(&item(2)).unwrap();
        for _ in 0..3 {
            store.record_sync_failure(a.id, 1, 3).unwrap();
            store.record_sync_failure(b.id, 1, 3).unwrap();
        }
        assert_eq!(store.reset_failed_sync_items().unwrap(), 2, "{name}");
        let due = store.sync_items_due(3).unwrap();
        assert!(due.iter().all(|i| i.retry_count == 0 && i.status == SyncState::Pending), "{name}");

        for _ in 0..3 {
            store.record_sync_failure(a.id, 1, 3).unwrap();
        }
        assert_eq!(store.delete_failed_sync_items().unwrap(), 1, "{name}");
        assert!(store.get_sync_item(a.id).unwrap().is_none(), "{name}");
    }
}

#[test]
fn purge_only_removes_synced_items() {
    for (name, store) in stores() {
        let synced = store.enqueue_sync_item(&item(1)).unwrap();
        let pending = store.enqueue_sync_item(&item(2)).unwrap();
        store.mark_sync_item_synced(synced.id, 1).unwrap();

        assert_eq!(store.purge_synced_before(i64::MAX).unwrap(), 1, "{name}");
        assert!(store.get_sync_item(pending.id).unwrap().is_some(), "{name}");
    }
}

#[test]
fn record_sync_status_only_applies_to_invoices_and_vouchers() {
    for (name, store) in stores() {
        let v = store.insert_voucher(&NewVoucher::payment(date(2), AccountId(3), dec!(4))).unwrap();
        assert!(store.set_record_sync_status(tables::VOUCHERS, v.id.get(), SyncState::Synced).unwrap());
        assert_eq!(store.get_voucher(v.id).unwrap().unwrap().sync_status, SyncState::Synced, "{name}");
        assert!(!store.set_record_sync_status(tables::PRODUCTS, 1, SyncState::Synced).unwrap());
    }
}

// ── App config & seeding ─────────────────────────────────────────

#[test]
fn config_upsert_keeps_description() {
    for (name, store) in stores() {
        store.config_set("theme", "dark", Some("UI theme")).unwrap();
        store.config_set("theme", "light", None).unwrap();
        let entry = store.config_get("theme").unwrap().unwrap();
        assert_eq!(entry.value, "light", "{name}");
        assert_eq!(entry.description.as_deref(), Some("UI theme"), "{name}");
    }
}

#[test]
fn seeding_happens_once() {
    for (name, store) in stores() {
        let seed = SeedData::default();
        assert!(store.seed_defaults(&seed).unwrap(), "{name}");
        assert!(!store.seed_defaults(&seed).unwrap(), "{name}");

        assert_eq!(store.list_accounts(None).unwrap().len(), seed.accounts.len(), "{name}");
        let marker = store.config_get(config_keys::DB_INITIALIZED).unwrap().unwrap();
        assert_eq!(marker.value, "true", "{name}");
        assert!(store.config_get(config_keys::APP_VERSION).unwrap().is_some(), "{name}");
    }
}

// ── SQLite specifics ─────────────────────────────────────────────

#[test]
fn export_contains_every_table() {
    let store = LocalStore::open_in_memory().unwrap();
    store.insert_product(&new_product("EXP")).unwrap();

    let dump = store.export_json().unwrap();
    for table in [tables::PRODUCTS, tables::STOCK_LOTS, tables::SYNC_QUEUE, tables::APP_CONFIG] {
        assert!(dump.get(table).is_some(), "missing {table}");
    }
    assert_eq!(dump[tables::PRODUCTS][0]["code"], "EXP");
    assert_eq!(dump[tables::PRODUCTS][0]["sale_price"], "15.50");
}

#[test]
fn closed_store_reports_closed() {
    let store = LocalStore::open_in_memory().unwrap();
    store.close();
    assert!(!store.is_open());
    assert!(matches!(store.get_product(ProductId(1)), Err(StorageError::Closed)));
    assert!(!store.diagnostics().is_open);
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dms.db");

    let store = LocalStore::open(&path).unwrap();
    let p = store.insert_product(&new_product("KEEP")).unwrap();
    store.close();

    StoreLifecycle::open(&store).unwrap();
    let found = store.get_product(p.id).unwrap().unwrap();
    assert_eq!(found.code, "KEEP");

    let diag = store.diagnostics();
    assert!(diag.is_open);
    assert_eq!(diag.schema_generation, Some(dms_storage::schema::SCHEMA_GENERATION));
    assert!(diag.table_counts.contains(&(tables::PRODUCTS.to_string(), 1)));
}
