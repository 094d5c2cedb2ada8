//! Catalog and stock-lot types.

use crate::{CompanyId, LotId, Money, ProductId, Quantity, Stamps};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A catalog product.
///
/// Only `sale_price` and `active` may change once the product is referenced
/// by a lot or an invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub code: String,
    pub name: String,
    pub company_id: CompanyId,
    pub sale_price: Money,
    pub pack_size: u32,
    pub active: bool,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    pub company_id: CompanyId,
    pub sale_price: Money,
    pub pack_size: u32,
}

/// A batch of stock received at one point in time.
///
/// Lots are never deleted. Consumption drains `remaining` down to zero and the
/// drained row stays behind for cost history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLot {
    pub id: LotId,
    pub product_id: ProductId,
    pub initial_quantity: Quantity,
    pub remaining: Quantity,
    pub unit_cost: Money,
    pub batch_no: Option<String>,
    pub expiry: Option<NaiveDate>,
    /// FIFO ordering key (ms since epoch); ties fall back to `id`.
    pub received_at: i64,
    #[serde(flatten)]
    pub stamps: Stamps,
}

impl StockLot {
    pub fn is_drained(&self) -> bool {
        self.remaining <= Decimal::ZERO
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStockLot {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub unit_cost: Money,
    pub batch_no: Option<String>,
    pub expiry: Option<NaiveDate>,
    pub received_at: i64,
}

/// One planned change to a lot's remaining quantity.
///
/// `before` is the value the plan was computed from; the store refuses to
/// apply the drain if the row no longer holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDrain {
    pub lot_id: LotId,
    pub product_id: ProductId,
    pub before: Quantity,
    pub after: Quantity,
}

impl LotDrain {
    pub fn taken(&self) -> Quantity {
        self.before - self.after
    }
}

/// Derived stock position of a single product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub weighted_average_cost: Money,
}

impl StockBalance {
    pub fn empty(product_id: ProductId) -> Self {
        Self {
            product_id,
            quantity: Decimal::ZERO,
            weighted_average_cost: Decimal::ZERO,
        }
    }

    /// Folds a set of lots into `{Σ remaining, Σ(remaining·cost) / Σ remaining}`.
    ///
    /// `None` when the stock value does not fit in a `Decimal`.
    pub fn from_lots<'a>(
        product_id: ProductId,
        lots: impl IntoIterator<Item = &'a StockLot>,
    ) -> Option<Self> {
        let mut quantity = Decimal::ZERO;
        let mut value = Decimal::ZERO;
        for lot in lots.into_iter().filter(|lot| lot.remaining > Decimal::ZERO) {
            quantity = quantity.checked_add(lot.remaining)?;
            value = value.checked_add(lot.remaining.checked_mul(lot.unit_cost)?)?;
        }

        if quantity.is_zero() {
            return Some(Self::empty(product_id));
        }

        Some(Self {
            product_id,
            quantity: quantity.normalize(),
            weighted_average_cost: value.checked_div(quantity)?.normalize(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lot(id: i64, remaining: Decimal, cost: Decimal) -> StockLot {
        StockLot {
            id: LotId(id),
            product_id: ProductId(1),
            initial_quantity: remaining,
            remaining,
            unit_cost: cost,
            batch_no: None,
            expiry: None,
            received_at: id,
            stamps: Stamps::default(),
        }
    }

    #[test]
    fn balance_of_no_lots_is_zero() {
        let balance = StockBalance::from_lots(ProductId(1), &[]);
        assert_eq!(balance, Some(StockBalance::empty(ProductId(1))));
    }

    #[test]
    fn balance_ignores_drained_lots() {
        let lots = [lot(1, dec!(0), dec!(10)), lot(2, dec!(30), dec!(12))];
        let balance = StockBalance::from_lots(ProductId(1), &lots).unwrap();
        assert_eq!(balance.quantity, dec!(30));
        assert_eq!(balance.weighted_average_cost, dec!(12));
    }

    #[test]
    fn balance_weights_cost_by_remaining() {
        let lots = [lot(1, dec!(100), dec!(10)), lot(2, dec!(50), dec!(13))];
        let balance = StockBalance::from_lots(ProductId(1), &lots).unwrap();
        assert_eq!(balance.quantity, dec!(150));
        assert_eq!(balance.weighted_average_cost, dec!(11));
    }

    #[test]
    fn overflowing_stock_value_is_none() {
        let lots = [lot(1, Decimal::MAX, dec!(2))];
        assert_eq!(StockBalance::from_lots(ProductId(1), &lots), None);
    }
}
