//! Row validation shared by every store implementation.

use crate::error::{StorageError, StorageResult};
use dms_types::{Money, NewAccount, NewProduct, NewStockLot, NewVoucher, limits};
use rust_decimal::Decimal;

fn amount_bound(what: &str, amount: Money) -> StorageResult<()> {
    if !limits::amount_in_range(amount) {
        return Err(StorageError::Validation(format!(
            "{what} exceeds {}, got {amount}",
            limits::MAX_AMOUNT
        )));
    }
    Ok(())
}

pub(crate) fn product(p: &NewProduct) -> StorageResult<()> {
    if p.code.trim().is_empty() {
        return Err(StorageError::Validation("product code is empty".into()));
    }
    if p.name.trim().is_empty() {
        return Err(StorageError::Validation("product name is empty".into()));
    }
    price(p.sale_price)?;
    if p.pack_size == 0 {
        return Err(StorageError::Validation("pack size must be at least 1".into()));
    }
    Ok(())
}

pub(crate) fn price(sale_price: Money) -> StorageResult<()> {
    if sale_price < Decimal::ZERO {
        return Err(StorageError::Validation(format!(
            "sale price must not be negative, got {sale_price}"
        )));
    }
    amount_bound("sale price", sale_price)
}

pub(crate) fn lot(lot: &NewStockLot) -> StorageResult<()> {
    if lot.quantity <= Decimal::ZERO {
        return Err(StorageError::Validation(format!(
            "lot quantity must be positive, got {}",
            lot.quantity
        )));
    }
    if lot.unit_cost < Decimal::ZERO {
        return Err(StorageError::Validation(format!(
            "unit cost must not be negative, got {}",
            lot.unit_cost
        )));
    }
    if !limits::quantity_in_range(lot.quantity) {
        return Err(StorageError::Validation(format!(
            "lot quantity exceeds {}, got {}",
            limits::MAX_QUANTITY,
            lot.quantity
        )));
    }
    amount_bound("unit cost", lot.unit_cost)
}

/// Exactly one side carries a positive amount.
pub(crate) fn voucher(v: &NewVoucher) -> StorageResult<()> {
    let debit = v.debit > Decimal::ZERO;
    let credit = v.credit > Decimal::ZERO;
    if v.debit < Decimal::ZERO || v.credit < Decimal::ZERO || debit == credit {
        return Err(StorageError::Validation(format!(
            "voucher needs exactly one positive side (debit {}, credit {})",
            v.debit, v.credit
        )));
    }
    amount_bound("voucher debit", v.debit)?;
    amount_bound("voucher credit", v.credit)
}

pub(crate) fn account(a: &NewAccount) -> StorageResult<()> {
    if a.name.trim().is_empty() {
        return Err(StorageError::Validation("account name is empty".into()));
    }
    if let Some(limit) = a.credit_limit {
        if limit < Decimal::ZERO {
            return Err(StorageError::Validation(format!(
                "credit limit must not be negative, got {limit}"
            )));
        }
        amount_bound("credit limit", limit)?;
    }
    Ok(())
}
