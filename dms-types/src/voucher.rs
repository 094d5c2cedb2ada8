//! Single-sided cash vouchers.

use crate::{AccountId, Money, ParseEnumError, Stamps, SyncState, VoucherId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoucherType {
    Recovery,
    Payment,
    Receipt,
    Expense,
}

impl VoucherType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recovery => "recovery",
            Self::Payment => "payment",
            Self::Receipt => "receipt",
            Self::Expense => "expense",
        }
    }

    /// Money received from a customer.
    pub fn is_customer_receipt(&self) -> bool {
        matches!(self, Self::Receipt | Self::Recovery)
    }
}

impl fmt::Display for VoucherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoucherType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recovery" => Ok(Self::Recovery),
            "payment" => Ok(Self::Payment),
            "receipt" => Ok(Self::Receipt),
            "expense" => Ok(Self::Expense),
            other => Err(ParseEnumError {
                kind: "voucher type",
                value: other.to_string(),
            }),
        }
    }
}

/// A cash movement against one account. Immutable once created apart from
/// `sync_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: VoucherId,
    pub date: NaiveDate,
    pub account_id: AccountId,
    pub description: Option<String>,
    pub debit: Money,
    pub credit: Money,
    pub voucher_type: VoucherType,
    pub reference_no: Option<String>,
    pub sync_status: SyncState,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVoucher {
    pub date: NaiveDate,
    pub account_id: AccountId,
    pub voucher_type: VoucherType,
    #[serde(default)]
    pub debit: Money,
    #[serde(default)]
    pub credit: Money,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference_no: Option<String>,
}

impl NewVoucher {
    /// A customer receipt crediting `amount` to `account_id`.
    pub fn receipt(date: NaiveDate, account_id: AccountId, amount: Money) -> Self {
        Self {
            date,
            account_id,
            voucher_type: VoucherType::Receipt,
            debit: Money::ZERO,
            credit: amount,
            description: None,
            reference_no: None,
        }
    }

    /// A supplier payment debiting `amount` to `account_id`.
    pub fn payment(date: NaiveDate, account_id: AccountId, amount: Money) -> Self {
        Self {
            date,
            account_id,
            voucher_type: VoucherType::Payment,
            debit: amount,
            credit: Money::ZERO,
            description: None,
            reference_no: None,
        }
    }
}
