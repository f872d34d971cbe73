// src/budget/pricing.rs
// Token pricing for LLM cost estimation
//
// Rates are per 1K tokens and come from configuration. Costs are rounded to
// whole cents (round-half-up) before they enter the ledger.

use serde::{Deserialize, Serialize};

/// Absorbs binary float error like 1.005 * 100 = 100.49999999999999
const ROUNDING_EPSILON: f64 = 1e-9;

/// Cost per 1K tokens (input, output)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Cost of a call, rounded to 2 decimal places
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        round_to(self.raw_cost(input_tokens, output_tokens), 2)
    }

    /// Unrounded cost
    pub fn raw_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::new(0.003, 0.015)
    }
}

/// Round half-up to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let scaled = value.abs() * scale;
    (scaled + 0.5 + ROUNDING_EPSILON).floor().copysign(value) / scale
}

/// Whole cents for exact aggregation
pub(crate) fn to_cents(amount: f64) -> i64 {
    (round_to(amount, 2) * 100.0).round() as i64
}

pub(crate) fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}
