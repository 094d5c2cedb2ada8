//! Local store schema: table DDL, secondary indexes and the touch triggers.
//!
//! The schema is registered in one place and applied on every open. A
//! database written by an older generation of the app is detected through
//! the `schema_generation` config row and surfaces as a schema conflict.

use crate::error::{StorageError, StorageResult};
use dms_types::{config_keys, tables};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

/// Bumped whenever the table layout changes incompatibly.
pub const SCHEMA_GENERATION: u32 = 3;

/// Milliseconds since Unix epoch, evaluated by SQLite.
pub(crate) const NOW_MS: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

fn stamp_columns() -> String {
    format!(
        "created_at INTEGER NOT NULL DEFAULT ({NOW_MS}),\n    updated_at INTEGER NOT NULL DEFAULT ({NOW_MS})"
    )
}

fn table_ddl() -> Vec<String> {
    let stamps = stamp_columns();
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {p} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    company_id INTEGER NOT NULL,
    sale_price TEXT NOT NULL,
    pack_size INTEGER NOT NULL DEFAULT 1,
    active INTEGER NOT NULL DEFAULT 1,
    {stamps}
)",
            p = tables::PRODUCTS
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id INTEGER NOT NULL,
    initial_quantity TEXT NOT NULL,
    remaining TEXT NOT NULL,
    unit_cost TEXT NOT NULL,
    batch_no TEXT,
    expiry TEXT,
    received_at INTEGER NOT NULL,
    {stamps}
)",
            t = tables::STOCK_LOTS
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    date TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    route_id INTEGER,
    salesman_id INTEGER,
    reference_no TEXT,
    is_cash INTEGER NOT NULL DEFAULT 0,
    amount TEXT NOT NULL,
    discount TEXT NOT NULL,
    tax TEXT NOT NULL,
    net_amount TEXT NOT NULL,
    notes TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    {stamps}
)",
            t = tables::INVOICES
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_id INTEGER NOT NULL,
    product_id INTEGER NOT NULL,
    quantity TEXT NOT NULL,
    rate TEXT NOT NULL,
    discount TEXT NOT NULL,
    tax TEXT NOT NULL,
    net_amount TEXT NOT NULL,
    {stamps}
)",
            t = tables::INVOICE_LINES
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    description TEXT,
    debit TEXT NOT NULL,
    credit TEXT NOT NULL,
    voucher_type TEXT NOT NULL,
    reference_no TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    {stamps}
)",
            t = tables::VOUCHERS
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    acct_type TEXT NOT NULL,
    name TEXT NOT NULL,
    route_id INTEGER,
    parent_id INTEGER,
    opening_balance TEXT NOT NULL,
    credit_limit TEXT,
    address TEXT,
    phone TEXT,
    {stamps}
)",
            t = tables::ACCOUNTS
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    record_id INTEGER NOT NULL,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_attempt INTEGER,
    created_at INTEGER NOT NULL,
    idempotency_key TEXT NOT NULL UNIQUE
)",
            t = tables::SYNC_QUEUE
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    value TEXT NOT NULL,
    description TEXT,
    updated_at INTEGER NOT NULL DEFAULT ({NOW_MS})
)",
            t = tables::APP_CONFIG
        ),
    ]
}

/// Secondary indexes as `(name, table, columns)`.
const INDEXES: &[(&str, &str, &str)] = &[
    ("idx_products_company_active", tables::PRODUCTS, "company_id, active"),
    ("idx_stock_lots_product", tables::STOCK_LOTS, "product_id"),
    ("idx_stock_lots_fifo", tables::STOCK_LOTS, "product_id, received_at, id"),
    ("idx_stock_lots_batch", tables::STOCK_LOTS, "batch_no"),
    ("idx_stock_lots_expiry", tables::STOCK_LOTS, "expiry"),
    ("idx_invoices_date", tables::INVOICES, "date"),
    ("idx_invoices_account", tables::INVOICES, "account_id"),
    ("idx_invoices_date_salesman", tables::INVOICES, "date, salesman_id"),
    ("idx_invoices_date_route", tables::INVOICES, "date, route_id"),
    ("idx_invoices_sync_status", tables::INVOICES, "sync_status"),
    ("idx_invoice_lines_invoice", tables::INVOICE_LINES, "invoice_id"),
    ("idx_invoice_lines_product", tables::INVOICE_LINES, "product_id"),
    ("idx_vouchers_date", tables::VOUCHERS, "date"),
    ("idx_vouchers_account", tables::VOUCHERS, "account_id"),
    ("idx_vouchers_type", tables::VOUCHERS, "voucher_type"),
    ("idx_vouchers_date_account", tables::VOUCHERS, "date, account_id"),
    ("idx_accounts_type", tables::ACCOUNTS, "acct_type"),
    ("idx_accounts_route", tables::ACCOUNTS, "route_id"),
    ("idx_accounts_type_route", tables::ACCOUNTS, "acct_type, route_id"),
    ("idx_sync_queue_table", tables::SYNC_QUEUE, "table_name"),
    ("idx_sync_queue_status", tables::SYNC_QUEUE, "status"),
    ("idx_sync_queue_created", tables::SYNC_QUEUE, "created_at"),
];

/// `updated_at` trigger for one monitored table. Fires only when the
/// statement itself left `updated_at` alone.
fn touch_trigger(table: &str) -> String {
    format!(
        "CREATE TRIGGER IF NOT EXISTS touch_{table} AFTER UPDATE ON {table}
FOR EACH ROW WHEN NEW.updated_at = OLD.updated_at
BEGIN
    UPDATE {table} SET updated_at = {NOW_MS} WHERE id = NEW.id;
END"
    )
}

/// Apply the full schema and verify the stored generation.
///
/// Registration is idempotent. A fresh database gets the current generation
/// recorded; an existing one with a different generation is rejected with
/// [`StorageError::SchemaConflict`].
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
    // journal_mode answers with a row, so it cannot go through execute_batch.
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

    for ddl in table_ddl() {
        conn.execute_batch(&ddl)?;
    }
    for (name, table, columns) in INDEXES {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {name} ON {table}({columns})"
        ))?;
    }
    for table in tables::MONITORED {
        conn.execute_batch(&touch_trigger(table))?;
    }

    match stored_generation(conn)? {
        None => {
            conn.execute(
                "INSERT INTO app_config (key, value, description) VALUES (?1, ?2, ?3)",
                params![
                    config_keys::SCHEMA_GENERATION,
                    SCHEMA_GENERATION.to_string(),
                    "Local schema generation"
                ],
            )?;
            debug!(generation = SCHEMA_GENERATION, "recorded schema generation");
        }
        Some(found) if found == SCHEMA_GENERATION => {}
        Some(found) => {
            return Err(StorageError::SchemaConflict(format!(
                "database generation {found} does not match {SCHEMA_GENERATION}"
            )));
        }
    }

    Ok(())
}

/// Generation recorded in `app_config`, if any.
pub fn stored_generation(conn: &Connection) -> StorageResult<Option<u32>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM app_config WHERE key = ?1",
            params![config_keys::SCHEMA_GENERATION],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        None => Ok(None),
        Some(text) => text.trim().parse::<u32>().map(Some).map_err(|_| {
            StorageError::SchemaConflict(format!("unreadable schema generation {text:?}"))
        }),
    }
}
