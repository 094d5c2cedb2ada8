//! Counterparty accounts and the chart-of-accounts tree.

use crate::{AccountId, Money, ParseEnumError, RouteId, Stamps};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Customer,
    Supplier,
    Expense,
    Income,
    Asset,
    Liability,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Supplier => "supplier",
            Self::Expense => "expense",
            Self::Income => "income",
            Self::Asset => "asset",
            Self::Liability => "liability",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "supplier" => Ok(Self::Supplier),
            "expense" => Ok(Self::Expense),
            "income" => Ok(Self::Income),
            "asset" => Ok(Self::Asset),
            "liability" => Ok(Self::Liability),
            other => Err(ParseEnumError {
                kind: "account type",
                value: other.to_string(),
            }),
        }
    }
}

/// A counterparty. The outstanding balance is derived on demand and never
/// stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub acct_type: AccountType,
    pub name: String,
    pub route_id: Option<RouteId>,
    pub parent_id: Option<AccountId>,
    pub opening_balance: Money,
    pub credit_limit: Option<Money>,
    pub address: Option<String>,
    pub phone: Option<String>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub acct_type: AccountType,
    pub name: String,
    #[serde(default)]
    pub route_id: Option<RouteId>,
    #[serde(default)]
    pub parent_id: Option<AccountId>,
    #[serde(default)]
    pub opening_balance: Money,
    #[serde(default)]
    pub credit_limit: Option<Money>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl NewAccount {
    pub fn named(acct_type: AccountType, name: impl Into<String>) -> Self {
        Self {
            acct_type,
            name: name.into(),
            route_id: None,
            parent_id: None,
            opening_balance: Money::ZERO,
            credit_limit: None,
            address: None,
            phone: None,
        }
    }
}

/// One node of the hierarchical account listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountNode {
    pub account: Account,
    pub children: Vec<AccountNode>,
}
