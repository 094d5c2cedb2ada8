//! Outstanding balance allocation.
//!
//! Settlements for an account are pooled and applied to its invoices oldest
//! first. Whatever is left after the last invoice is reported as credit and
//! never turns an outstanding amount negative. Nothing here writes.

use crate::error::{LedgerError, LedgerResult};
use chrono::NaiveDate;
use dms_storage::Store;
use dms_types::{AccountId, AccountType, InvoiceId, InvoiceKind, Money, VoucherType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which way money flows for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerSide {
    /// Sales owed to us, settled by receipts and sale returns.
    Receivable,
    /// Purchases we owe, settled by payments and purchase returns.
    Payable,
}

impl LedgerSide {
    pub fn for_account(acct_type: AccountType) -> Self {
        match acct_type {
            AccountType::Supplier | AccountType::Liability => Self::Payable,
            _ => Self::Receivable,
        }
    }

    fn invoice_kind(self) -> InvoiceKind {
        match self {
            Self::Receivable => InvoiceKind::Sale,
            Self::Payable => InvoiceKind::Purchase,
        }
    }

    fn return_kind(self) -> InvoiceKind {
        match self {
            Self::Receivable => InvoiceKind::SaleReturn,
            Self::Payable => InvoiceKind::PurchaseReturn,
        }
    }
}

/// An invoice ready for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDue {
    pub invoice_id: InvoiceId,
    pub date: NaiveDate,
    pub total: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceAllocation {
    pub invoice_id: InvoiceId,
    pub date: NaiveDate,
    pub total: Money,
    pub allocated: Money,
    pub outstanding: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAllocation {
    pub account_id: AccountId,
    pub side: LedgerSide,
    pub invoices: Vec<InvoiceAllocation>,
    pub total_invoiced: Money,
    pub total_settled: Money,
    pub outstanding: Money,
    pub credit: Money,
}

/// Customer-level summary. Both figures are non-negative and at most one is
/// non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerOutstanding {
    pub account_id: AccountId,
    pub outstanding: Money,
    pub credit: Money,
}

/// Walk `invoices` oldest first, applying the settlement pool.
///
/// Returns the per-invoice breakdown and the unapplied credit.
pub fn allocate(invoices: &[InvoiceDue], settlements: Money) -> (Vec<InvoiceAllocation>, Money) {
    let mut ordered = invoices.to_vec();
    ordered.sort_by_key(|inv| (inv.date, inv.invoice_id));

    let mut pool = settlements.max(Decimal::ZERO);
    let rows = ordered
        .into_iter()
        .map(|inv| {
            let due = inv.total.max(Decimal::ZERO);
            let allocated = pool.min(due);
            pool -= allocated;
            InvoiceAllocation {
                invoice_id: inv.invoice_id,
                date: inv.date,
                total: inv.total,
                allocated,
                outstanding: due - allocated,
            }
        })
        .collect();
    (rows, pool)
}

/// Read-only allocator over the shared store.
#[derive(Clone)]
pub struct OutstandingAllocator {
    store: Arc<dyn Store>,
}

impl OutstandingAllocator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Full per-invoice breakdown for one account.
    pub async fn allocation_for_account(&self, account_id: AccountId) -> LedgerResult<AccountAllocation> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || account_allocation(store.as_ref(), account_id)).await?
    }

    pub async fn outstanding_for_customer(&self, account_id: AccountId) -> LedgerResult<CustomerOutstanding> {
        let allocation = self.allocation_for_account(account_id).await?;
        Ok(CustomerOutstanding {
            account_id,
            outstanding: allocation.outstanding,
            credit: allocation.credit,
        })
    }

    /// Outstanding amount of one invoice under its account's allocation.
    pub async fn outstanding_for_invoice(&self, invoice_id: InvoiceId) -> LedgerResult<Money> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || -> LedgerResult<Money> {
            let invoice = store
                .get_invoice(invoice_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("invoice {invoice_id}")))?;
            let allocation = account_allocation(store.as_ref(), invoice.account_id)?;
            Ok(allocation
                .invoices
                .iter()
                .find(|row| row.invoice_id == invoice_id)
                .map(|row| row.outstanding)
                // Return invoices are settlements, not debts.
                .unwrap_or(Money::ZERO))
        })
        .await?
    }
}

fn checked_sum(values: impl IntoIterator<Item = Money>, what: &str) -> LedgerResult<Money> {
    values
        .into_iter()
        .try_fold(Money::ZERO, |sum, v| sum.checked_add(v))
        .ok_or_else(|| LedgerError::Validation(format!("{what} is out of range")))
}

/// Invoice total as the sum of its line nets.
fn line_total(store: &dyn Store, invoice_id: InvoiceId) -> LedgerResult<Money> {
    let lines = store.invoice_lines(invoice_id)?;
    checked_sum(lines.iter().map(|line| line.net_amount), "invoice total")
}

fn account_allocation(store: &dyn Store, account_id: AccountId) -> LedgerResult<AccountAllocation> {
    let account = store
        .get_account(account_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("account {account_id}")))?;
    let side = LedgerSide::for_account(account.acct_type);

    let invoices = store.invoices_for_account(account_id, &[side.invoice_kind(), side.return_kind()])?;
    let mut due = Vec::new();
    let mut returns = Money::ZERO;
    for invoice in &invoices {
        let total = line_total(store, invoice.id)?;
        if invoice.kind == side.invoice_kind() {
            due.push(InvoiceDue {
                invoice_id: invoice.id,
                date: invoice.date,
                total,
            });
        } else {
            returns = checked_sum([returns, total], "returned total")?;
        }
    }

    let vouchers = store.vouchers_for_account(account_id)?;
    let payments = checked_sum(
        vouchers.iter().map(|v| match side {
            LedgerSide::Receivable if v.voucher_type.is_customer_receipt() => v.credit,
            LedgerSide::Payable if v.voucher_type == VoucherType::Payment => v.debit,
            _ => Money::ZERO,
        }),
        "settled total",
    )?;

    let total_settled = checked_sum([payments, returns], "settled total")?;
    let total_invoiced = checked_sum(due.iter().map(|inv| inv.total), "invoiced total")?;
    let (rows, credit) = allocate(&due, total_settled);
    let outstanding = checked_sum(rows.iter().map(|row| row.outstanding), "outstanding total")?;

    Ok(AccountAllocation {
        account_id,
        side,
        invoices: rows,
        total_invoiced,
        total_settled,
        outstanding,
        credit,
    })
}
