//! Stock and money rules for DMS.
//!
//! - [`FifoLedger`]: FIFO stock lots, invoice postings and vouchers
//! - [`OutstandingAllocator`]: read-only outstanding balances
//! - [`chart_tree`]: hierarchical account listing

mod allocator;
mod chart;
mod error;
mod fifo;
mod keyed_lock;
mod posting;

pub use allocator::{
    AccountAllocation, CustomerOutstanding, InvoiceAllocation, InvoiceDue, LedgerSide,
    OutstandingAllocator, allocate,
};
pub use chart::{build_tree, chart_tree};
pub use error::{LedgerError, LedgerResult};
pub use fifo::{Consumption, ConsumptionPlan, FifoLedger, plan_consumption};
pub use keyed_lock::{KeyGuard, KeyedLocks};
pub use posting::PostingReceipt;
