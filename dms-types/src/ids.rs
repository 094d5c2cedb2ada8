//! Strongly-typed integer identifiers (NewType pattern).
//!
//! Foreign references between tables are plain ids; nothing enforces that the
//! referenced row exists.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Catalog product.
    ProductId
);
define_id!(
    /// Stock lot. Allocated monotonically, so it doubles as the FIFO tie-breaker.
    LotId
);
define_id!(InvoiceId);
define_id!(InvoiceLineId);
define_id!(VoucherId);
define_id!(AccountId);
define_id!(
    /// Outbox entry.
    SyncItemId
);
define_id!(RouteId);
define_id!(SalesmanId);
define_id!(CompanyId);
