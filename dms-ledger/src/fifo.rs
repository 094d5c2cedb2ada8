//! FIFO stock ledger.
//!
//! Stock for a product is the set of its lots. Consumption always drains the
//! oldest lot with stock left first (by `received_at`, then id), and either
//! satisfies the whole request or touches nothing.

use crate::error::{LedgerError, LedgerResult};
use crate::keyed_lock::KeyedLocks;
use dms_storage::Store;
use dms_types::{
    LotDrain, Money, NewStockLot, ProductId, Quantity, StockBalance, StockLot, limits,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drains that satisfy one consumption request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionPlan {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub drains: Vec<LotDrain>,
    /// Σ taken · unit cost over the drained lots.
    pub cost: Money,
}

/// Plan a FIFO consumption against a snapshot of a product's lots.
///
/// Pure: nothing is written. Fails with [`LedgerError::InsufficientStock`]
/// when the lots cannot cover `quantity`.
pub fn plan_consumption(
    product_id: ProductId,
    lots: &[StockLot],
    quantity: Quantity,
) -> LedgerResult<ConsumptionPlan> {
    check_quantity("consumption quantity", quantity)?;

    let mut open: Vec<&StockLot> = lots
        .iter()
        .filter(|lot| lot.product_id == product_id && !lot.is_drained())
        .collect();
    open.sort_by_key(|lot| (lot.received_at, lot.id));

    let available = open
        .iter()
        .try_fold(Quantity::ZERO, |sum, lot| sum.checked_add(lot.remaining))
        .ok_or_else(|| overflow(product_id))?;
    if available < quantity {
        return Err(LedgerError::InsufficientStock {
            product_id,
            available,
            requested: quantity,
        });
    }

    let mut left = quantity;
    let mut drains = Vec::new();
    let mut cost = Money::ZERO;
    for lot in open {
        if left.is_zero() {
            break;
        }
        let take = left.min(lot.remaining);
        drains.push(LotDrain {
            lot_id: lot.id,
            product_id,
            before: lot.remaining,
            after: lot.remaining - take,
        });
        cost = take
            .checked_mul(lot.unit_cost)
            .and_then(|value| cost.checked_add(value))
            .ok_or_else(|| overflow(product_id))?;
        left -= take;
    }

    Ok(ConsumptionPlan {
        product_id,
        quantity,
        drains,
        cost,
    })
}

pub(crate) fn overflow(product_id: ProductId) -> LedgerError {
    LedgerError::Validation(format!("stock value of product {product_id} is out of range"))
}

/// Positive and at most [`limits::MAX_QUANTITY`].
pub(crate) fn check_quantity(what: &str, quantity: Quantity) -> LedgerResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "{what} must be positive, got {quantity}"
        )));
    }
    if !limits::quantity_in_range(quantity) {
        return Err(LedgerError::Validation(format!(
            "{what} exceeds {}, got {quantity}",
            limits::MAX_QUANTITY
        )));
    }
    Ok(())
}

/// Non-negative and at most [`limits::MAX_AMOUNT`].
pub(crate) fn check_amount(what: &str, amount: Money) -> LedgerResult<()> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "{what} must not be negative, got {amount}"
        )));
    }
    if !limits::amount_in_range(amount) {
        return Err(LedgerError::Validation(format!(
            "{what} exceeds {}, got {amount}",
            limits::MAX_AMOUNT
        )));
    }
    Ok(())
}

/// Result of a committed consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    pub plan: ConsumptionPlan,
    pub lots: Vec<StockLot>,
}

/// FIFO ledger over a shared store.
///
/// Mutations for one product are serialized through a per-product lock;
/// different products proceed in parallel.
#[derive(Clone)]
pub struct FifoLedger {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) locks: Arc<KeyedLocks<ProductId>>,
}

impl FifoLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Record a new lot. Quantity must be positive and cost non-negative,
    /// both within [`limits`].
    pub async fn add_lot(&self, lot: NewStockLot) -> LedgerResult<StockLot> {
        check_quantity("lot quantity", lot.quantity)?;
        check_amount("unit cost", lot.unit_cost)?;

        let _guard = self.locks.lock(lot.product_id).await;
        let store = Arc::clone(&self.store);
        let created = tokio::task::spawn_blocking(move || store.insert_lot(&lot)).await??;
        debug!(
            product_id = %created.product_id,
            lot_id = %created.id,
            quantity = %created.initial_quantity,
            unit_cost = %created.unit_cost,
            "stock lot added"
        );
        Ok(created)
    }

    /// Take `quantity` out of the product's lots, oldest first.
    ///
    /// All-or-nothing: on [`LedgerError::InsufficientStock`] no lot changes.
    pub async fn consume(&self, product_id: ProductId, quantity: Quantity) -> LedgerResult<Consumption> {
        let _guard = self.locks.lock(product_id).await;
        let store = Arc::clone(&self.store);

        let consumption = tokio::task::spawn_blocking(move || -> LedgerResult<Consumption> {
            let lots = store.lots_for_product(product_id)?;
            let plan = plan_consumption(product_id, &lots, quantity)?;
            let lots = store.apply_drains(&plan.drains)?;
            Ok(Consumption { plan, lots })
        })
        .await?;

        match &consumption {
            Ok(c) => info!(
                product_id = %product_id,
                quantity = %quantity,
                lots = c.lots.len(),
                cost = %c.plan.cost,
                "stock consumed"
            ),
            Err(LedgerError::InsufficientStock { available, .. }) => warn!(
                product_id = %product_id,
                requested = %quantity,
                available = %available,
                "insufficient stock"
            ),
            Err(_) => {}
        }
        consumption
    }

    /// `{Σ remaining, weighted average cost}` over lots with stock left.
    pub async fn balance(&self, product_id: ProductId) -> LedgerResult<StockBalance> {
        let lots = self.lots(product_id).await?;
        StockBalance::from_lots(product_id, &lots).ok_or_else(|| overflow(product_id))
    }

    /// Every lot of a product, drained ones included, oldest first.
    pub async fn lots(&self, product_id: ProductId) -> LedgerResult<Vec<StockLot>> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.lots_for_product(product_id)).await??)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms_types::{LotId, Stamps};
    use rust_decimal_macros::dec;

    fn lot(id: i64, remaining: Decimal, cost: Decimal, received_at: i64) -> StockLot {
        StockLot {
            id: LotId(id),
            product_id: ProductId(1),
            initial_quantity: remaining,
            remaining,
            unit_cost: cost,
            batch_no: None,
            expiry: None,
            received_at,
            stamps: Stamps::default(),
        }
    }

    #[test]
    fn plan_takes_oldest_first() {
        let lots = [lot(2, dec!(50), dec!(12), 20), lot(1, dec!(100), dec!(10), 10)];
        let plan = plan_consumption(ProductId(1), &lots, dec!(120)).unwrap();

        assert_eq!(plan.drains.len(), 2);
        assert_eq!(plan.drains[0].lot_id, LotId(1));
        assert_eq!(plan.drains[0].after, dec!(0));
        assert_eq!(plan.drains[1].lot_id, LotId(2));
        assert_eq!(plan.drains[1].after, dec!(30));
        assert_eq!(plan.cost, dec!(1240));
    }

    #[test]
    fn plan_breaks_ties_by_id() {
        let lots = [lot(7, dec!(5), dec!(2), 10), lot(3, dec!(5), dec!(1), 10)];
        let plan = plan_consumption(ProductId(1), &lots, dec!(5)).unwrap();
        assert_eq!(plan.drains.len(), 1);
        assert_eq!(plan.drains[0].lot_id, LotId(3));
    }

    #[test]
    fn plan_skips_drained_lots() {
        let lots = [lot(1, dec!(0), dec!(10), 1), lot(2, dec!(4), dec!(11), 2)];
        let plan = plan_consumption(ProductId(1), &lots, dec!(4)).unwrap();
        assert_eq!(plan.drains.len(), 1);
        assert_eq!(plan.drains[0].lot_id, LotId(2));
    }

    #[test]
    fn plan_reports_shortfall() {
        let lots = [lot(1, dec!(100), dec!(10), 1), lot(2, dec!(50), dec!(12), 2)];
        match plan_consumption(ProductId(1), &lots, dec!(200)) {
            Err(LedgerError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available, dec!(150));
                assert_eq!(requested, dec!(200));
            }
            other => panic!("expected shortfall, got {other:?}"),
        }
    }

    #[test]
    fn plan_rejects_non_positive_quantity() {
        let lots = [lot(1, dec!(1), dec!(1), 1)];
        assert!(matches!(
            plan_consumption(ProductId(1), &lots, dec!(0)),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn plan_cost_overflow_is_a_validation_error() {
        let lots = [lot(1, dec!(1000000000), Decimal::MAX, 1)];
        let err = plan_consumption(ProductId(1), &lots, dec!(1000000000)).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn oversized_request_is_rejected_before_planning() {
        let lots = [lot(1, dec!(5), dec!(1), 1)];
        let err = plan_consumption(ProductId(1), &lots, dec!(1000000000000000)).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}
