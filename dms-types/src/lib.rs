//! Shared domain types for the DMS offline store.
//!
//! Every entity is keyed by a stable integer id and referenced by id only
//! (no live object graphs). Money and quantities are `rust_decimal::Decimal`
//! so that sums over thousands of lots do not drift.

mod account;
mod ids;
mod inventory;
mod invoice;
mod sync;
mod voucher;

pub use account::{Account, AccountNode, AccountType, NewAccount};
pub use ids::{
    AccountId, CompanyId, InvoiceId, InvoiceLineId, LotId, ProductId, RouteId, SalesmanId,
    SyncItemId, VoucherId,
};
pub use inventory::{LotDrain, NewProduct, NewStockLot, Product, StockBalance, StockLot};
pub use invoice::{
    Invoice, InvoiceDraft, InvoiceKind, InvoiceLine, InvoiceTotals, LineDraft, NewInvoice,
    NewInvoiceLine,
};
pub use sync::{AppConfigEntry, NewSyncItem, SyncOperation, SyncQueueItem, SyncState, SyncStatus};
pub use voucher::{NewVoucher, Voucher, VoucherType};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Monetary amount.
pub type Money = rust_decimal::Decimal;

/// Stock quantity.
pub type Quantity = rust_decimal::Decimal;

/// Magnitude bounds accepted on input.
///
/// Products of a bounded quantity and a bounded amount stay far below
/// `Decimal::MAX`, so sums over every lot or line of a product cannot
/// overflow in practice. Derived arithmetic is still checked.
pub mod limits {
    use rust_decimal::Decimal;

    /// 10^9 units in a single lot, line or consumption.
    pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

    /// 10^12 for a single unit cost, rate, discount, tax, price or voucher side.
    pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

    pub fn quantity_in_range(q: Decimal) -> bool {
        q <= MAX_QUANTITY
    }

    pub fn amount_in_range(a: Decimal) -> bool {
        a <= MAX_AMOUNT
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use rust_decimal_macros::dec;

        #[test]
        fn bounds_are_powers_of_ten() {
            assert_eq!(MAX_QUANTITY, dec!(1000000000));
            assert_eq!(MAX_AMOUNT, dec!(1000000000000));
        }

        #[test]
        fn bounded_product_fits() {
            assert!(MAX_QUANTITY.checked_mul(MAX_AMOUNT).is_some());
        }
    }
}

/// Unknown textual value for one of the enum columns.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Bookkeeping timestamps carried by every monitored table row.
///
/// Values are milliseconds since the Unix epoch. They are owned by the store:
/// callers never set them directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamps {
    pub created_at: i64,
    pub updated_at: i64,
}

impl Stamps {
    pub fn at(now: i64) -> Self {
        Self {
            created_at: now,
            updated_at: now,
        }
    }
}

/// Logical table names, shared by the store schema and the sync endpoints.
pub mod tables {
    pub const PRODUCTS: &str = "products";
    pub const STOCK_LOTS: &str = "stock_lots";
    pub const INVOICES: &str = "invoices";
    pub const INVOICE_LINES: &str = "invoice_lines";
    pub const VOUCHERS: &str = "vouchers";
    pub const ACCOUNTS: &str = "accounts";
    pub const SYNC_QUEUE: &str = "sync_queue";
    pub const APP_CONFIG: &str = "app_config";

    /// Tables whose rows are stamped on every write.
    pub const MONITORED: &[&str] = &[PRODUCTS, STOCK_LOTS, INVOICES, INVOICE_LINES, VOUCHERS, ACCOUNTS];
}

/// Well-known `app_config` keys.
pub mod config_keys {
    pub const DB_INITIALIZED: &str = "db_initialized";
    pub const APP_VERSION: &str = "app_version";
    pub const SCHEMA_GENERATION: &str = "schema_generation";
    pub const LAST_SYNC: &str = "last_sync";
}

/// Current time in milliseconds since Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
