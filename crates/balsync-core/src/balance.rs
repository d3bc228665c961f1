//! Decimal helpers shared by every reconciliation step.
//!
//! Balances are `rust_decimal::Decimal` end to end. The store keeps two
//! fractional digits; anything within [`DIVERGENCE_THRESHOLD`] of zero is
//! display noise and never applied to either side.

use rust_decimal::{Decimal, RoundingStrategy};

/// 0.001: deltas at or below this magnitude are "no change".
pub const DIVERGENCE_THRESHOLD: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Fractional digits kept by the RemoteStore (`NUMERIC(15,2)`).
pub const STORE_SCALE: u32 = 2;

/// `true` when `|a - b|` exceeds the divergence threshold.
#[inline]
pub fn is_divergent(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() > DIVERGENCE_THRESHOLD
}

/// `true` when `delta` is within the threshold of zero.
#[inline]
pub fn is_negligible(delta: Decimal) -> bool {
    delta.abs() <= DIVERGENCE_THRESHOLD
}

/// Round to store precision, midpoint away from zero.
#[inline]
pub fn to_store_precision(d: Decimal) -> Decimal {
    d.round_dp_with_strategy(STORE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
