//! Invoice and voucher posting.
//!
//! A posting validates the draft, plans every stock movement under the
//! per-product locks and hands the whole change set to the store as one
//! transaction.

use crate::error::{LedgerError, LedgerResult};
use crate::fifo::{FifoLedger, check_amount, check_quantity, overflow, plan_consumption};
use dms_storage::{PostedInvoice, Posting, Store};
use dms_types::{
    InvoiceDraft, InvoiceKind, LotDrain, Money, NewStockLot, NewVoucher, ProductId, Quantity,
    StockBalance, Voucher, now_millis,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a committed posting produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingReceipt {
    #[serde(flatten)]
    pub posted: PostedInvoice,
    /// FIFO cost of the stock taken out (zero for postings that add stock).
    pub cost_of_goods: Money,
}

fn validate_draft(draft: &InvoiceDraft) -> LedgerResult<()> {
    if draft.lines.is_empty() {
        return Err(LedgerError::Validation("invoice has no lines".into()));
    }
    for (idx, line) in draft.lines.iter().enumerate() {
        check_quantity(&format!("line {idx}: quantity"), line.quantity)?;
        check_amount(&format!("line {idx}: rate"), line.rate)?;
        check_amount(&format!("line {idx}: discount"), line.discount)?;
        check_amount(&format!("line {idx}: tax"), line.tax)?;
    }
    Ok(())
}

/// Quantity per product across all lines, in product-id order.
fn quantities_by_product(draft: &InvoiceDraft) -> LedgerResult<BTreeMap<ProductId, Quantity>> {
    let mut totals = BTreeMap::new();
    for line in &draft.lines {
        let total = totals.entry(line.product_id).or_insert(Decimal::ZERO);
        *total = total
            .checked_add(line.quantity)
            .ok_or_else(|| overflow(line.product_id))?;
    }
    Ok(totals)
}

/// Unit cost for stock coming back from a customer: the current weighted
/// average, else the most recent lot's cost, else the line rate.
fn return_cost(
    lots: &[dms_types::StockLot],
    product_id: ProductId,
    rate: Money,
) -> LedgerResult<Money> {
    let balance = StockBalance::from_lots(product_id, lots).ok_or_else(|| overflow(product_id))?;
    if !balance.quantity.is_zero() {
        return Ok(balance.weighted_average_cost);
    }
    Ok(lots
        .iter()
        .max_by_key(|lot| (lot.received_at, lot.id))
        .map(|lot| lot.unit_cost)
        .unwrap_or(rate))
}

/// Build the change set for a draft against current lots. Runs on the
/// blocking pool while the product locks are held.
fn build_posting(store: &dyn Store, draft: &InvoiceDraft) -> LedgerResult<(Posting, Money)> {
    let (invoice, lines) = draft
        .to_rows()
        .ok_or_else(|| LedgerError::Validation("invoice totals are out of range".into()))?;
    let mut drains: Vec<LotDrain> = Vec::new();
    let mut new_lots = Vec::new();
    let mut cost_of_goods = Money::ZERO;

    match draft.kind {
        InvoiceKind::Sale | InvoiceKind::PurchaseReturn => {
            for (product_id, quantity) in quantities_by_product(draft)? {
                let lots = store.lots_for_product(product_id)?;
                let plan = plan_consumption(product_id, &lots, quantity)?;
                cost_of_goods = cost_of_goods
                    .checked_add(plan.cost)
                    .ok_or_else(|| overflow(product_id))?;
                drains.extend(plan.drains);
            }
        }
        InvoiceKind::Purchase => {
            let received_at = now_millis();
            for line in &draft.lines {
                new_lots.push(NewStockLot {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_cost: line.rate,
                    batch_no: draft.reference_no.clone(),
                    expiry: None,
                    received_at,
                });
            }
        }
        InvoiceKind::SaleReturn => {
            let received_at = now_millis();
            for line in &draft.lines {
                let lots = store.lots_for_product(line.product_id)?;
                new_lots.push(NewStockLot {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_cost: return_cost(&lots, line.product_id, line.rate)?,
                    batch_no: draft.reference_no.clone(),
                    expiry: None,
                    received_at,
                });
            }
        }
    }

    Ok((
        Posting {
            invoice,
            lines,
            drains,
            new_lots,
        },
        cost_of_goods,
    ))
}

impl FifoLedger {
    /// Post an invoice of any kind.
    ///
    /// Sales and purchase returns consume stock FIFO and fail as a whole if
    /// any product is short. Purchases add one lot per line at the line rate.
    /// Sale returns add one lot per line at the product's current average
    /// cost.
    pub async fn post_invoice(&self, draft: InvoiceDraft) -> LedgerResult<PostingReceipt> {
        validate_draft(&draft)?;

        let products: Vec<ProductId> = draft.lines.iter().map(|l| l.product_id).collect();
        let _guards = self.locks.lock_many(products).await;

        let store = Arc::clone(&self.store);
        let kind = draft.kind;
        let result = tokio::task::spawn_blocking(move || -> LedgerResult<PostingReceipt> {
            let (posting, cost_of_goods) = build_posting(store.as_ref(), &draft)?;
            let posted = store.commit_posting(&posting)?;
            Ok(PostingReceipt {
                posted,
                cost_of_goods,
            })
        })
        .await?;

        match &result {
            Ok(receipt) => info!(
                invoice_id = %receipt.posted.invoice.id,
                kind = %kind,
                net_amount = %receipt.posted.invoice.net_amount,
                lines = receipt.posted.lines.len(),
                "invoice posted"
            ),
            Err(err) => warn!(kind = %kind, error = %err, "invoice posting rejected"),
        }
        result
    }

    pub async fn post_sale(&self, draft: InvoiceDraft) -> LedgerResult<PostingReceipt> {
        self.post_invoice(InvoiceDraft {
            kind: InvoiceKind::Sale,
            ..draft
        })
        .await
    }

    pub async fn post_sale_return(&self, draft: InvoiceDraft) -> LedgerResult<PostingReceipt> {
        self.post_invoice(InvoiceDraft {
            kind: InvoiceKind::SaleReturn,
            ..draft
        })
        .await
    }

    pub async fn post_purchase(&self, draft: InvoiceDraft) -> LedgerResult<PostingReceipt> {
        self.post_invoice(InvoiceDraft {
            kind: InvoiceKind::Purchase,
            ..draft
        })
        .await
    }

    pub async fn post_purchase_return(&self, draft: InvoiceDraft) -> LedgerResult<PostingReceipt> {
        self.post_invoice(InvoiceDraft {
            kind: InvoiceKind::PurchaseReturn,
            ..draft
        })
        .await
    }

    /// Record a cash voucher. Exactly one of debit and credit must be positive.
    pub async fn record_voucher(&self, voucher: NewVoucher) -> LedgerResult<Voucher> {
        let debit = voucher.debit > Decimal::ZERO;
        let credit = voucher.credit > Decimal::ZERO;
        if voucher.debit < Decimal::ZERO || voucher.credit < Decimal::ZERO || debit == credit {
            return Err(LedgerError::Validation(format!(
                "voucher needs exactly one positive side (debit {}, credit {})",
                voucher.debit, voucher.credit
            )));
        }
        check_amount("voucher debit", voucher.debit)?;
        check_amount("voucher credit", voucher.credit)?;

        let store = Arc::clone(&self.store);
        let created = tokio::task::spawn_blocking(move || store.insert_voucher(&voucher)).await??;
        info!(
            voucher_id = %created.id,
            account_id = %created.account_id,
            voucher_type = %created.voucher_type,
            "voucher recorded"
        );
        Ok(created)
    }
}
