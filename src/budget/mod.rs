// src/budget/mod.rs

//! Budget tracking for LLM API costs
//!
//! Converts token usage into currency, keeps an append-only ledger and
//! answers whether a call is affordable against daily and monthly caps.

pub mod ledger;
pub mod pricing;

pub use ledger::{
    Affordability, BudgetLimits, BudgetPeriod, BudgetSummary, CostEntry, CostLedger, Environment,
};
pub use pricing::{Pricing, round_to};
