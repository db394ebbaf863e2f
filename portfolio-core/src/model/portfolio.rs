use chrono::{DateTime, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::eastern_time;

/// Net holding of a ticker at a snapshot instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
	pub ticker: String,
	pub shares: Decimal,
	pub avg_price: Decimal,
	pub cost_basis: Decimal,
	pub currency: String,
	pub company: Option<String>,
	pub current_price: Option<Decimal>,
	pub market_value: Option<Decimal>,
	pub unrealized_pnl: Option<Decimal>,
	pub stop_loss: Option<Decimal>,
	/// Change in unrealized P&L since yesterday's close, joined in from a
	/// prior snapshot rather than re-derived from `cost_basis` (doing the
	/// latter made daily and total P&L coincide for every position — see
	/// `RemoteDatabaseRepository::get_latest_portfolio_with_pnl`).
	pub daily_pnl: Option<Decimal>,
	pub five_day_pnl: Option<Decimal>,
}

impl Position {
	pub fn new(ticker: impl Into<String>, shares: Decimal, avg_price: Decimal, currency: impl Into<String>) -> Position {
		Position {
			ticker: ticker.into(),
			shares,
			avg_price,
			cost_basis: avg_price * shares,
			currency: currency.into(),
			company: None,
			current_price: None,
			market_value: None,
			unrealized_pnl: None,
			stop_loss: None,
			daily_pnl: None,
			five_day_pnl: None,
		}
	}

	pub fn closed(ticker: impl Into<String>, currency: impl Into<String>) -> Position {
		Position::new(ticker, Decimal::ZERO, Decimal::ZERO, currency)
	}

	pub fn is_closed(&self) -> bool {
		self.shares <= Decimal::ZERO
	}

	/// Recomputes `market_value`/`unrealized_pnl` from a new price. Positions
	/// whose fetch failed keep their prior price via the caller simply not
	/// invoking this.
	pub fn with_price(mut self, price: Decimal) -> Position {
		self.current_price = Some(price);
		let market_value = price * self.shares;
		self.market_value = Some(market_value);
		self.unrealized_pnl = Some(market_value - self.cost_basis);
		self
	}
}

/// Set of positions at one timestamp for one fund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
	pub snapshot_id: Uuid,
	pub fund: String,
	pub timestamp: DateTime<Utc>,
	pub positions: Vec<Position>,
	pub total_value: Option<Decimal>,
	pub cash_balance: Option<Decimal>,
	pub total_shares: Option<Decimal>,
}

impl PortfolioSnapshot {
	pub fn new(fund: impl Into<String>, timestamp: DateTime<Utc>, positions: Vec<Position>) -> PortfolioSnapshot {
		PortfolioSnapshot {
			snapshot_id: Uuid::new_v4(),
			fund: fund.into(),
			timestamp,
			positions,
			total_value: None,
			cash_balance: None,
			total_shares: None,
		}
	}

	/// Builds a market-close snapshot: timestamp normalized to 16:00 Eastern
	/// for `date`, converted to UTC for storage.
	pub fn at_market_close(fund: impl Into<String>, date: NaiveDate, positions: Vec<Position>) -> PortfolioSnapshot {
		PortfolioSnapshot::new(fund, eastern_time(date, 16, 0), positions)
	}

	/// Upsert a position by ticker, preserving closed (0-share) rows rather
	/// than deleting them (invariant).
	pub fn add_position(&mut self, position: Position) {
		if let Some(existing) = self.positions.iter_mut().find(|p| p.ticker == position.ticker) {
			*existing = position;
		} else {
			self.positions.push(position);
		}
	}

	pub fn position(&self, ticker: &str) -> Option<&Position> {
		self.positions.iter().find(|p| p.ticker == ticker)
	}

	/// Calendar date in the trading timezone, used for the one-snapshot-per-
	/// (fund, date) invariant.
	pub fn calendar_date(&self) -> NaiveDate {
		self.timestamp.with_timezone(&chrono_tz::America::New_York).date_naive()
	}

	/// A market-close snapshot is normalized to 16:00 Eastern.
	pub fn is_market_close(&self) -> bool {
		let eastern = self.timestamp.with_timezone(&chrono_tz::America::New_York);
		eastern.hour() == 16 && eastern.minute() == 0
	}
}
