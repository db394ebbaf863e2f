//! Regenerates portfolio snapshots after a backdated trade, and fills in
//! any trading day between the last snapshot and today with that day's
//! historical close. Everything here goes through `Repository`;
//! nothing reads or writes the CSV/SQLite files directly.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

use crate::calendar::{eastern_time, MarketCalendar};
use crate::error::RepositoryError;
use crate::model::{Action, PortfolioSnapshot, Position, Trade};
use crate::price_service::PriceService;
use crate::repository::Repository;

#[derive(Debug, Default, Clone)]
struct RunningPosition {
	shares: Decimal,
	cost: Decimal,
	currency: String,
}

pub struct HistoricalRebuilder<'a> {
	repository: &'a dyn Repository,
	price_service: &'a PriceService,
	calendar: MarketCalendar,
}

impl<'a> HistoricalRebuilder<'a> {
	pub fn new(repository: &'a dyn Repository, price_service: &'a PriceService) -> HistoricalRebuilder<'a> {
		HistoricalRebuilder { repository, price_service, calendar: MarketCalendar::new() }
	}

	/// Replays every trade at or before end-of-day for each trading day in
	/// `[from, today]` and upserts one snapshot per day. Running twice
	/// with the same trade log produces byte-identical snapshots, since the
	/// per-day replay is a pure function of the trade log and historical
	/// closes.
	pub async fn rebuild_from(&self, fund: &str, from: NaiveDate) -> Result<usize, RepositoryError> {
		let today = self.calendar.last_trading_date(chrono::Utc::now());
		let mut all_trades = self.repository.get_trade_history(None, None).await?;
		all_trades.sort_by_key(|trade| trade.timestamp);

		let mut rebuilt = 0;
		let mut day = from;
		while day <= today {
			if self.calendar.is_trading_day(day) {
				self.rebuild_one_day(fund, day, &all_trades).await?;
				rebuilt += 1;
			}
			day = day.succ_opt().expect("NaiveDate does not overflow within a rebuild window");
		}
		info!(fund, %from, %today, rebuilt, "historical rebuild completed");
		Ok(rebuilt)
	}

	async fn rebuild_one_day(&self, fund: &str, day: NaiveDate, all_trades: &[Trade]) -> Result<(), RepositoryError> {
		let end_of_day = eastern_time(day, 23, 59);
		let running = replay_running_positions(all_trades.iter().filter(|trade| trade.timestamp <= end_of_day));

		let mut positions = Vec::with_capacity(running.len());
		for (ticker, state) in running {
			if state.shares <= Decimal::ZERO {
				continue;
			}
			let close = self.price_service.get_historical_close(&ticker, day).await;
			let mut position = Position::new(ticker.as_str(), state.shares, average_cost(state.cost, state.shares), state.currency.as_str());
			position.cost_basis = state.cost;
			if let Some(close) = close {
				position = position.with_price(close);
			}
			positions.push(position);
		}

		let snapshot = PortfolioSnapshot::at_market_close(fund, day, positions);
		self.repository.save_portfolio_snapshot(&snapshot, true).await
	}

	/// Fills every trading day between the latest existing snapshot and
	/// today that has no snapshot yet, continuing from the latest known
	/// positions rather than replaying the whole trade log per day.
	/// Existing dates are determined exclusively through
	/// `Repository::get_portfolio_data`, never by inspecting files.
	pub async fn backfill_missing_trading_days(&self, fund: &str) -> Result<usize, RepositoryError> {
		let today = self.calendar.last_trading_date(chrono::Utc::now());
		let snapshots = self.repository.get_portfolio_data(None).await?;
		let Some(latest) = snapshots.iter().max_by_key(|snapshot| snapshot.timestamp) else {
			return Ok(0);
		};
		let existing_dates: std::collections::HashSet<NaiveDate> = snapshots.iter().map(|snapshot| snapshot.calendar_date()).collect();
		let latest_date = latest.calendar_date();

		let mut baseline: HashMap<String, RunningPosition> = latest
			.positions
			.iter()
			.filter(|position| position.shares > Decimal::ZERO)
			.map(|position| {
				(
					position.ticker.clone(),
					RunningPosition { shares: position.shares, cost: position.cost_basis, currency: position.currency.clone() },
				)
			})
			.collect();

		let mut filled = 0;
		let mut day = latest_date;
		while day < today {
			day = day.succ_opt().expect("NaiveDate does not overflow within a backfill window");
			if !self.calendar.is_trading_day(day) || existing_dates.contains(&day) {
				continue;
			}
			let mut positions = Vec::with_capacity(baseline.len());
			for (ticker, state) in &baseline {
				let close = self.price_service.get_historical_close(ticker, day).await;
				let mut position = Position::new(ticker.as_str(), state.shares, average_cost(state.cost, state.shares), state.currency.as_str());
				position.cost_basis = state.cost;
				if let Some(close) = close {
					position = position.with_price(close);
				}
				positions.push(position);
			}
			let snapshot = PortfolioSnapshot::at_market_close(fund, day, positions);
			self.repository.save_portfolio_snapshot(&snapshot, true).await?;
			filled += 1;
			let _ = &mut baseline; // baseline is unchanged day over day: no new trades land on a filled-in gap day
		}
		Ok(filled)
	}
}

/// Simplified running-average-cost replay: a SELL reduces shares and
/// cost proportionally at the running average, it does not consult the FIFO
/// lot engine. FIFO-accurate realized P&L lives in the trade log, not here.
fn replay_running_positions<'a>(trades: impl Iterator<Item = &'a Trade>) -> HashMap<String, RunningPosition> {
	let mut running: HashMap<String, RunningPosition> = HashMap::new();
	for trade in trades {
		let state = running.entry(trade.ticker.clone()).or_insert_with(|| RunningPosition {
			shares: Decimal::ZERO,
			cost: Decimal::ZERO,
			currency: trade.currency.clone(),
		});
		match trade.action {
			Action::Buy => {
				state.shares += trade.shares;
				state.cost += trade.cost_basis;
				state.currency = trade.currency.clone();
			}
			Action::Sell => {
				if state.shares > Decimal::ZERO {
					let cost_per_share = state.cost / state.shares;
					state.shares -= trade.shares;
					state.cost -= trade.shares * cost_per_share;
				}
				if state.shares < Decimal::ZERO {
					state.shares = Decimal::ZERO;
				}
				if state.cost < Decimal::ZERO {
					state.cost = Decimal::ZERO;
				}
			}
		}
	}
	running
}

fn average_cost(cost: Decimal, shares: Decimal) -> Decimal {
	if shares > Decimal::ZERO {
		cost / shares
	} else {
		Decimal::ZERO
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cache::PriceCache;
	use crate::fetcher::{MarketDataFetcher, VendorClient};
	use crate::model::{FundamentalsRecord, OhlcRow, PriceFrame};
	use crate::repository::LocalFileRepository;
	use async_trait::async_trait;
	use chrono::Utc;
	use rust_decimal_macros::dec;
	use std::time::Duration;

	struct FlatCloseClient {
		close: Decimal,
	}

	#[async_trait]
	impl VendorClient for FlatCloseClient {
		async fn fetch_price_history(&self, _ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceFrame, crate::error::FetchError> {
			let mut frame = PriceFrame::new();
			let mut day = start;
			while day <= end {
				frame.insert(day, OhlcRow { open: self.close, high: self.close, low: self.close, close: self.close, adj_close: self.close, volume: 1 });
				day = day.succ_opt().unwrap();
			}
			Ok(frame)
		}
		async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsRecord, crate::error::FetchError> {
			Ok(FundamentalsRecord { ticker: ticker.to_string(),..Default::default() })
		}
	}

	fn price_service(close: Decimal) -> PriceService {
		let fetcher = MarketDataFetcher::new(
			Box::new(FlatCloseClient { close }),
			Box::new(FlatCloseClient { close }),
			Box::new(FlatCloseClient { close }),
			HashMap::new(),
		);
		PriceService::new(fetcher, PriceCache::new(Duration::from_secs(3600), Duration::from_secs(3600), 64), MarketCalendar::new())
	}

	#[test]
	fn replay_reduces_shares_and_cost_proportionally_on_sell() {
		let buy = Trade::new_buy("main", "AAPL", dec!(10), dec!(100), Utc::now(), "USD", "buy").unwrap();
		let sell = Trade::new_sell("main", "AAPL", dec!(4), dec!(120), Utc::now(), "USD", "sell", dec!(400), dec!(80)).unwrap();
		let running = replay_running_positions([&buy, &sell].into_iter());
		let state = &running["AAPL"];
		assert_eq!(state.shares, dec!(6));
		assert_eq!(state.cost, dec!(600));
	}

	#[tokio::test]
	async fn rebuild_from_writes_one_snapshot_per_trading_day_in_range() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let monday = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let trade = Trade::new_buy("main", "AAPL", dec!(10), dec!(100), eastern_time(monday, 10, 0), "USD", "buy").unwrap();
		repository.save_trade(&trade).await.unwrap();

		let price_service = price_service(dec!(110));
		let rebuilder = HistoricalRebuilder::new(&repository, &price_service);
		let today = rebuilder.calendar.last_trading_date(eastern_time(monday, 16, 0));
		let rebuilt = rebuilder.rebuild_from("main", monday).await.unwrap();
		assert!(rebuilt >= 1);

		let snapshots = repository.get_portfolio_data(None).await.unwrap();
		assert!(snapshots.iter().any(|s| s.calendar_date() == monday || s.calendar_date() == today));
		let monday_snapshot = snapshots.iter().find(|s| s.calendar_date() == monday).unwrap();
		assert_eq!(monday_snapshot.positions[0].shares, dec!(10));
	}

	#[tokio::test]
	async fn rebuild_from_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let monday = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let trade = Trade::new_buy("main", "AAPL", dec!(10), dec!(100), eastern_time(monday, 10, 0), "USD", "buy").unwrap();
		repository.save_trade(&trade).await.unwrap();

		let price_service = price_service(dec!(110));
		let rebuilder = HistoricalRebuilder::new(&repository, &price_service);
		rebuilder.rebuild_from("main", monday).await.unwrap();
		let first = repository.get_portfolio_data(None).await.unwrap();
		rebuilder.rebuild_from("main", monday).await.unwrap();
		let second = repository.get_portfolio_data(None).await.unwrap();
		assert_eq!(first.len(), second.len());
	}
}
