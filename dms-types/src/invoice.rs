//! Sale and purchase invoices.

use crate::{
    AccountId, InvoiceId, InvoiceLineId, Money, ParseEnumError, ProductId, Quantity, RouteId,
    SalesmanId, Stamps, SyncState,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    Sale,
    SaleReturn,
    Purchase,
    PurchaseReturn,
}

impl InvoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::SaleReturn => "sale_return",
            Self::Purchase => "purchase",
            Self::PurchaseReturn => "purchase_return",
        }
    }

    /// True when posting this invoice takes stock out of the ledger.
    pub fn consumes_stock(&self) -> bool {
        matches!(self, Self::Sale | Self::PurchaseReturn)
    }
}

impl fmt::Display for InvoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sale" => Ok(Self::Sale),
            "sale_return" => Ok(Self::SaleReturn),
            "purchase" => Ok(Self::Purchase),
            "purchase_return" => Ok(Self::PurchaseReturn),
            other => Err(ParseEnumError {
                kind: "invoice kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Stored invoice header. Totals are always derived from the lines at
/// posting time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub kind: InvoiceKind,
    pub date: NaiveDate,
    pub account_id: AccountId,
    pub route_id: Option<RouteId>,
    pub salesman_id: Option<SalesmanId>,
    pub reference_no: Option<String>,
    pub is_cash: bool,
    pub amount: Money,
    pub discount: Money,
    pub tax: Money,
    pub net_amount: Money,
    pub notes: Option<String>,
    pub sync_status: SyncState,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: InvoiceLineId,
    pub invoice_id: InvoiceId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub rate: Money,
    pub discount: Money,
    pub tax: Money,
    pub net_amount: Money,
    #[serde(flatten)]
    pub stamps: Stamps,
}

/// What the application submits for posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub kind: InvoiceKind,
    pub date: NaiveDate,
    pub account_id: AccountId,
    pub route_id: Option<RouteId>,
    pub salesman_id: Option<SalesmanId>,
    pub reference_no: Option<String>,
    pub is_cash: bool,
    pub notes: Option<String>,
    pub lines: Vec<LineDraft>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineDraft {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub rate: Money,
    #[serde(default)]
    pub discount: Money,
    #[serde(default)]
    pub tax: Money,
}

impl LineDraft {
    /// `qty · rate`, or `None` on overflow.
    pub fn gross_amount(&self) -> Option<Money> {
        self.quantity.checked_mul(self.rate)
    }

    /// `qty · rate − discount + tax`, or `None` on overflow.
    pub fn net_amount(&self) -> Option<Money> {
        self.gross_amount()?
            .checked_sub(self.discount)?
            .checked_add(self.tax)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub amount: Money,
    pub discount: Money,
    pub tax: Money,
    pub net_amount: Money,
}

impl InvoiceDraft {
    /// Header totals summed from the lines. `None` when a total overflows.
    pub fn totals(&self) -> Option<InvoiceTotals> {
        let mut totals = InvoiceTotals::default();
        for line in &self.lines {
            totals.amount = totals.amount.checked_add(line.gross_amount()?)?;
            totals.discount = totals.discount.checked_add(line.discount)?;
            totals.tax = totals.tax.checked_add(line.tax)?;
            totals.net_amount = totals.net_amount.checked_add(line.net_amount()?)?;
        }
        Some(totals)
    }

    /// Splits the draft into the header and line rows the store inserts.
    pub fn to_rows(&self) -> Option<(NewInvoice, Vec<NewInvoiceLine>)> {
        let totals = self.totals()?;
        let header = NewInvoice {
            kind: self.kind,
            date: self.date,
            account_id: self.account_id,
            route_id: self.route_id,
            salesman_id: self.salesman_id,
            reference_no: self.reference_no.clone(),
            is_cash: self.is_cash,
            totals,
            notes: self.notes.clone(),
        };
        let lines = self
            .lines
            .iter()
            .map(|line| {
                Some(NewInvoiceLine {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    rate: line.rate,
                    discount: line.discount,
                    tax: line.tax,
                    net_amount: line.net_amount()?,
                })
            })
            .collect::<Option<Vec<_>>>()?;
        Some((header, lines))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub kind: InvoiceKind,
    pub date: NaiveDate,
    pub account_id: AccountId,
    pub route_id: Option<RouteId>,
    pub salesman_id: Option<SalesmanId>,
    pub reference_no: Option<String>,
    pub is_cash: bool,
    pub totals: InvoiceTotals,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoiceLine {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub rate: Money,
    pub discount: Money,
    pub tax: Money,
    pub net_amount: Money,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn draft() -> InvoiceDraft {
        InvoiceDraft {
            kind: InvoiceKind::Sale,
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap_or_default(),
            account_id: AccountId(7),
            route_id: None,
            salesman_id: None,
            reference_no: None,
            is_cash: false,
            notes: None,
            lines: vec![
                LineDraft {
                    product_id: ProductId(1),
                    quantity: dec!(10),
                    rate: dec!(12.5),
                    discount: dec!(5),
                    tax: dec!(2),
                },
                LineDraft {
                    product_id: ProductId(2),
                    quantity: dec!(3),
                    rate: dec!(100),
                    discount: dec!(0),
                    tax: dec!(0),
                },
            ],
        }
    }

    #[test]
    fn header_totals_come_from_lines() {
        let totals = draft().totals().unwrap();
        assert_eq!(
            totals,
            InvoiceTotals {
                amount: dec!(425),
                discount: dec!(5),
                tax: dec!(2),
                net_amount: dec!(422),
            }
        );
    }

    #[test]
    fn rows_carry_line_net_amounts() {
        let (header, lines) = draft().to_rows().unwrap();
        assert_eq!(header.totals.net_amount, dec!(422));
        let line_sum: Money = lines.iter().map(|l| l.net_amount).sum();
        assert_eq!(line_sum, header.totals.net_amount);
    }

    #[test]
    fn kind_round_trips_through_text() {
        for kind in [
            InvoiceKind::Sale,
            InvoiceKind::SaleReturn,
            InvoiceKind::Purchase,
            InvoiceKind::PurchaseReturn,
        ] {
            assert_eq!(kind.as_str().parse::<InvoiceKind>(), Ok(kind));
        }
        assert!("refund".parse::<InvoiceKind>().is_err());
    }

    #[test]
    fn overflowing_line_has_no_totals() {
        let mut d = draft();
        d.lines[0].quantity = rust_decimal::Decimal::MAX;
        assert_eq!(d.lines[0].gross_amount(), None);
        assert_eq!(d.totals(), None);
        assert!(d.to_rows().is_none());
    }
}
