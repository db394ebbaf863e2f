//! FIFO lot engine: per-ticker lot queues rebuilt from a fund's trade
//! history. Lots are derived state; nothing here is persisted directly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::LotEngineError;
use crate::model::{Lot, LotTracker, SaleSlice, Trade};

#[derive(Debug, Default)]
pub struct LotEngine {
	trackers: HashMap<String, LotTracker>,
}

impl LotEngine {
	pub fn new() -> LotEngine {
		LotEngine::default()
	}

	/// Replays a fund's trade history in ascending timestamp order.
	/// An unsatisfiable historical SELL is logged and skipped rather than
	/// aborting the rebuild; `validate_data_integrity` surfaces it later.
	pub fn rebuild_from_trades(trades: &[Trade]) -> LotEngine {
		let mut engine = LotEngine::new();
		let mut sorted: Vec<&Trade> = trades.iter().collect();
		sorted.sort_by_key(|t| t.timestamp);
		for trade in sorted {
			if trade.is_buy() {
				engine.add_lot(&trade.ticker, trade.shares, trade.price, trade.timestamp, &trade.currency);
			} else if let Err(error) = engine.sell_fifo(&trade.ticker, trade.shares, trade.price, trade.timestamp) {
				warn!(ticker = %trade.ticker, %error, "unsatisfiable historical SELL during lot rebuild, continuing best-effort");
			}
		}
		engine
	}

	pub fn add_lot(&mut self, ticker: &str, shares: Decimal, price: Decimal, timestamp: DateTime<Utc>, currency: &str) -> Lot {
		let tracker = self
			.trackers
			.entry(ticker.to_string())
			.or_insert_with(|| LotTracker::new(ticker));
		let lot = Lot::new(ticker, shares, price, timestamp, currency);
		tracker.push(lot.clone());
		lot
	}

	/// Consumes lots oldest-`purchase_timestamp`-first. A sell exactly
	/// equal to a lot's remaining shares fully consumes it without emitting
	/// an extra empty slice.
	pub fn sell_fifo(
		&mut self,
		ticker: &str,
		shares: Decimal,
		sell_price: Decimal,
		_sell_timestamp: DateTime<Utc>,
	) -> Result<Vec<SaleSlice>, LotEngineError> {
		if shares <= Decimal::ZERO || sell_price <= Decimal::ZERO {
			return Err(LotEngineError::InvalidTrade("shares and price must both be positive".to_string()));
		}
		let tracker = self
			.trackers
			.entry(ticker.to_string())
			.or_insert_with(|| LotTracker::new(ticker));

		let available = tracker.total_remaining_shares();
		if available < shares {
			return Err(LotEngineError::InsufficientShares {
				ticker: ticker.to_string(),
				requested: shares,
				available,
			});
		}

		let mut remaining_to_sell = shares;
		let mut slices = Vec::new();
		for index in tracker.fifo_order() {
			if remaining_to_sell <= Decimal::ZERO {
				break;
			}
			let lot = tracker.lot_mut(index);
			if lot.remaining_shares <= Decimal::ZERO {
				continue;
			}
			let shares_from_lot = remaining_to_sell.min(lot.remaining_shares);
			let cost_basis_sold = (shares_from_lot / lot.original_shares) * lot.original_cost_basis;
			let proceeds = shares_from_lot * sell_price;
			lot.remaining_shares -= shares_from_lot;
			slices.push(SaleSlice {
				lot_id: lot.lot_id,
				shares_sold: shares_from_lot,
				cost_basis_sold,
				proceeds,
				realized_pnl: proceeds - cost_basis_sold,
			});
			remaining_to_sell -= shares_from_lot;
		}
		Ok(slices)
	}

	pub fn remaining_shares(&self, ticker: &str) -> Decimal {
		self.trackers.get(ticker).map(LotTracker::total_remaining_shares).unwrap_or(Decimal::ZERO)
	}

	pub fn remaining_cost_basis(&self, ticker: &str) -> Decimal {
		self.trackers.get(ticker).map(LotTracker::total_remaining_cost_basis).unwrap_or(Decimal::ZERO)
	}

	pub fn average_cost(&self, ticker: &str) -> Decimal {
		self.trackers.get(ticker).map(LotTracker::average_cost).unwrap_or(Decimal::ZERO)
	}

	pub fn tracker(&self, ticker: &str) -> Option<&LotTracker> {
		self.trackers.get(ticker)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rust_decimal_macros::dec;

	fn ts(day: u32) -> DateTime<Utc> {
		crate::calendar::eastern_time(chrono::NaiveDate::from_ymd_opt(2026, 1, day).unwrap(), 16, 0)
	}

	/// Scenario A: Buy 100 @ 100.00, Sell 100 @ 110.00 -> realized P&L 1000.00.
	#[test]
	fn simple_buy_sell_realizes_expected_pnl() {
		let mut engine = LotEngine::new();
		engine.add_lot("AAPL", dec!(100), dec!(100.00), ts(2), "USD");
		let slices = engine.sell_fifo("AAPL", dec!(100), dec!(110.00), ts(3)).unwrap();
		let total_pnl: Decimal = slices.iter().map(|s| s.realized_pnl).sum();
		assert_eq!(total_pnl, dec!(1000.00));
		assert_eq!(engine.remaining_shares("AAPL"), dec!(0));
	}

	/// Scenario B: FIFO consumes the oldest (cheaper) lot first, producing a
	/// larger realized gain than average-cost accounting would.
	#[test]
	fn fifo_consumes_oldest_lot_first() {
		let mut engine = LotEngine::new();
		engine.add_lot("AAPL", dec!(100), dec!(100.00), ts(1), "USD");
		engine.add_lot("AAPL", dec!(100), dec!(120.00), ts(2), "USD");
		let slices = engine.sell_fifo("AAPL", dec!(100), dec!(130.00), ts(3)).unwrap();
		let total_pnl: Decimal = slices.iter().map(|s| s.realized_pnl).sum();
		assert_eq!(total_pnl, dec!(3000.00));
		assert_eq!(engine.remaining_shares("AAPL"), dec!(100));
		assert_eq!(engine.remaining_cost_basis("AAPL"), dec!(12000.00));
	}

	/// Scenario C: partial sell then rebuy.
	#[test]
	fn partial_sell_then_rebuy_tracks_blended_cost_basis() {
		let mut engine = LotEngine::new();
		engine.add_lot("AAPL", dec!(100), dec!(100.00), ts(1), "USD");
		let slices = engine.sell_fifo("AAPL", dec!(50), dec!(110.00), ts(2)).unwrap();
		let pnl: Decimal = slices.iter().map(|s| s.realized_pnl).sum();
		assert_eq!(pnl, dec!(500.00));
		engine.add_lot("AAPL", dec!(25), dec!(105.00), ts(3), "USD");
		assert_eq!(engine.remaining_shares("AAPL"), dec!(75));
		assert_eq!(engine.remaining_cost_basis("AAPL"), dec!(7625.00));
	}

	#[test]
	fn sell_more_than_held_is_rejected() {
		let mut engine = LotEngine::new();
		engine.add_lot("AAPL", dec!(10), dec!(100.00), ts(1), "USD");
		let result = engine.sell_fifo("AAPL", dec!(20), dec!(110.00), ts(2));
		assert!(matches!(result, Err(LotEngineError::InsufficientShares {.. })));
	}

	#[test]
	fn selling_exact_remaining_shares_fully_consumes_lot_without_extra_slice() {
		let mut engine = LotEngine::new();
		engine.add_lot("AAPL", dec!(10), dec!(100.00), ts(1), "USD");
		let slices = engine.sell_fifo("AAPL", dec!(10), dec!(100.00), ts(2)).unwrap();
		assert_eq!(slices.len(), 1);
		assert!(engine.tracker("AAPL").unwrap().lots()[0].is_fully_sold());
	}

	#[test]
	fn zero_share_or_zero_price_trades_are_rejected() {
		let mut engine = LotEngine::new();
		engine.add_lot("AAPL", dec!(10), dec!(100.00), ts(1), "USD");
		assert!(engine.sell_fifo("AAPL", dec!(0), dec!(100.00), ts(2)).is_err());
		assert!(engine.sell_fifo("AAPL", dec!(1), dec!(0), ts(2)).is_err());
	}

	/// Cash-flow identity: realized P&L + remaining cost basis equals
	/// total buy cost basis minus total sell proceeds, in exact decimal.
	#[test]
	fn cash_flow_identity_holds_exactly() {
		let mut engine = LotEngine::new();
		engine.add_lot("AAPL", dec!(100), dec!(100.00), ts(1), "USD");
		engine.add_lot("AAPL", dec!(50), dec!(90.00), ts(2), "USD");
		let mut total_buy_cost = dec!(100) * dec!(100.00) + dec!(50) * dec!(90.00);
		let slices = engine.sell_fifo("AAPL", dec!(120), dec!(95.00), ts(3)).unwrap();
		let total_realized: Decimal = slices.iter().map(|s| s.realized_pnl).sum();
		let total_proceeds: Decimal = slices.iter().map(|s| s.proceeds).sum();
		let remaining_cost_basis = engine.remaining_cost_basis("AAPL");
		total_buy_cost -= total_proceeds - total_realized; // sold cost basis removed from the buy total
		assert_eq!(total_realized + remaining_cost_basis, total_buy_cost);
	}
}
