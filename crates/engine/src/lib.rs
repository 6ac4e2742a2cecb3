//! Delivery bookkeeping and message rendering.

pub mod formatter;
pub mod ledger;
