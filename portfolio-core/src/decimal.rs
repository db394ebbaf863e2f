//! Fixed-scale rounding applied only at persistence boundaries.
//! In-memory values stay at full `Decimal` precision; rounding never happens
//! mid-calculation.

use rust_decimal::{Decimal, RoundingStrategy};

pub const SHARE_SCALE: u32 = 4;
pub const MONEY_SCALE: u32 = 2;

pub fn round_shares(value: Decimal) -> Decimal {
	value.round_dp_with_strategy(SHARE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_money(value: Decimal) -> Decimal {
	value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// True when `a` and `b` agree within `tolerance` (used by integrity checks
/// that compare derived fields).
pub fn approx_eq(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
	(a - b).abs() <= tolerance
}
