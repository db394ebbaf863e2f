//! Centralized price fetching used by both the interactive refresh path and
//! `HistoricalRebuilder`. Wraps `MarketDataFetcher` with a cache-first
//! strategy and never touches storage directly: callers persist whatever
//! they get back through `Repository`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::cache::PriceCache;
use crate::calendar::MarketCalendar;
use crate::error::FetchError;
use crate::fetcher::MarketDataFetcher;
use crate::model::{PortfolioSnapshot, Position, PriceFrame};

/// Which kind of price a position update should carry: a current quote
/// (never persisted to the disk cache) or a close looked up for a past date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceMode {
	Current,
	Historical { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStats {
	pub cache_hits: usize,
	pub api_calls: usize,
}

pub struct PriceService {
	fetcher: MarketDataFetcher,
	cache: PriceCache,
	calendar: MarketCalendar,
}

impl PriceService {
	pub fn new(fetcher: MarketDataFetcher, cache: PriceCache, calendar: MarketCalendar) -> PriceService {
		PriceService { fetcher, cache, calendar }
	}

	/// Per-ticker frames over `[start, end]`, checking the cache before
	/// calling out to the fetcher. A cached frame only counts as a hit if
	/// its stored range actually covers the request.
	pub async fn get_historical_prices(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> (HashMap<String, PriceFrame>, FetchStats) {
		let mut out = HashMap::new();
		let mut stats = FetchStats::default();
		for ticker in tickers {
			match self.frame_for(ticker, start, end).await {
				Ok((frame, from_cache)) => {
					if from_cache {
						stats.cache_hits += 1;
					} else {
						stats.api_calls += 1;
					}
					out.insert(ticker.clone(), (*frame).clone());
				}
				Err(error) => {
					warn!(ticker, %error, "failed to fetch historical prices");
					out.insert(ticker.clone(), PriceFrame::new());
				}
			}
		}
		(out, stats)
	}

	/// Cache-first frame lookup for one ticker over `[start, end]`; fetches
	/// and populates the cache on a miss.
	async fn frame_for(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<(Arc<PriceFrame>, bool), FetchError> {
		if let Some(frame) = self.cache.get_price_frame(ticker) {
			if covers(&frame, start, end) {
				return Ok((frame, true));
			}
		}
		let (frame, _source) = self.fetcher.fetch_price_history(ticker, start, end).await?;
		self.cache.put_price_frame(ticker, frame.clone());
		Ok((Arc::new(frame), false))
	}

	/// Latest quote per ticker, fetched fresh every call (current
	/// prices are never written to the disk cache, only market-close
	/// closes are worth persisting).
	pub async fn get_current_prices(&self, tickers: &[String]) -> HashMap<String, Option<Decimal>> {
		let mut out = HashMap::new();
		let today = chrono::Utc::now().date_naive();
		for ticker in tickers {
			let price = match self.fetcher.fetch_price_history(ticker, today, today).await {
				Ok((frame, _)) => frame.values().next_back().map(|row| row.close),
				Err(error) => {
					warn!(ticker, %error, "failed to fetch current price");
					None
				}
			};
			out.insert(ticker.clone(), price);
		}
		out
	}

	/// Rebuilds each position with a fresh `current_price`/`market_value`/
	/// `unrealized_pnl`. A position whose fetch fails keeps its previous
	/// price untouched rather than being zeroed.
	pub async fn update_positions_with_prices(&self, positions: Vec<Position>, mode: PriceMode) -> Vec<Position> {
		if positions.is_empty() {
			return positions;
		}
		let tickers: Vec<String> = positions.iter().map(|p| p.ticker.clone()).collect();
		let prices: HashMap<String, Option<Decimal>> = match mode {
			PriceMode::Current => self.get_current_prices(&tickers).await,
			PriceMode::Historical { start, end } => {
				let (frames, _stats) = self.get_historical_prices(&tickers, start, end).await;
				frames
					.into_iter()
					.map(|(ticker, frame)| (ticker, frame.values().next_back().map(|row| row.close)))
					.collect()
			}
		};

		positions
			.into_iter()
			.map(|position| match prices.get(&position.ticker).copied().flatten() {
				Some(price) if price > Decimal::ZERO => position.with_price(price),
				_ => {
					debug!(ticker = %position.ticker, "no fresh price available, keeping prior price");
					position
				}
			})
			.collect()
	}

	/// Historical close for one day, used by `HistoricalRebuilder`.
	/// Tries the exact day, then a +/-1 day window, then +/-3 days; within
	/// whichever window returns data, picks the latest close at or before
	/// `date`.
	pub async fn get_historical_close(&self, ticker: &str, date: NaiveDate) -> Option<Decimal> {
		for radius in [0i64, 1, 3] {
			let start = date - chrono::Duration::days(radius);
			let end = date + chrono::Duration::days(radius);
			if let Ok((frame, _from_cache)) = self.frame_for(ticker, start, end).await {
				if let Some(close) = frame.range(..=date).next_back().map(|(_, row)| row.close) {
					return Some(close);
				}
			}
		}
		None
	}

	/// Decision table for whether the portfolio needs refreshing today.
	/// `now` drives the market-open check and is compared against `today`,
	/// which is the calendar date the caller is evaluating (usually
	/// `now`'s date, but callers may probe a specific date). Returns the
	/// decision plus a short human-readable reason.
	pub fn should_update_portfolio(&self, latest_snapshot: Option<&PortfolioSnapshot>, today: NaiveDate, now: DateTime<Utc>) -> (bool, String) {
		let today_is_trading_day = self.calendar.is_trading_day(today);

		let latest_date = latest_snapshot.map(|snapshot| snapshot.calendar_date());
		let missing_days = match latest_date {
			Some(date) if date < today => self.calendar.trading_days_strictly_between(date, today),
			_ => Vec::new(),
		};

		match latest_date {
			None if today_is_trading_day => (true, "no existing snapshot, today is a trading day".to_string()),
			None => (false, "no existing snapshot and today is not a trading day".to_string()),
			Some(_) if !missing_days.is_empty() => (true, format!("{} trading day(s) missing since the last snapshot", missing_days.len())),
			Some(date) if date == today && today_is_trading_day => {
				if self.calendar.is_market_open(now) {
					(true, "market is open, refreshing with live prices".to_string())
				} else if latest_snapshot.is_some_and(PortfolioSnapshot::is_market_close) {
					(false, "already have today's market-close snapshot".to_string())
				} else {
					(true, "market is closed, updating with the official close".to_string())
				}
			}
			Some(date) if date == today => (false, "portfolio already updated today".to_string()),
			Some(_) if today_is_trading_day => (true, "today is a trading day".to_string()),
			Some(_) => (false, "today is not a trading day and no trading days are missing".to_string()),
		}
	}
}

fn covers(frame: &PriceFrame, start: NaiveDate, end: NaiveDate) -> bool {
	match (frame.keys().next(), frame.keys().next_back()) {
		(Some(&first), Some(&last)) => first <= start && last >= end,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fetcher::VendorClient;
	use crate::model::{FundamentalsRecord, OhlcRow};
	use async_trait::async_trait;
	use rust_decimal_macros::dec;
	use std::time::Duration;

	struct StubClient {
		frame: PriceFrame,
	}

	#[async_trait]
	impl VendorClient for StubClient {
		async fn fetch_price_history(&self, _ticker: &str, _start: NaiveDate, _end: NaiveDate) -> Result<PriceFrame, FetchError> {
			Ok(self.frame.clone())
		}
		async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsRecord, FetchError> {
			Ok(FundamentalsRecord { ticker: ticker.to_string(),..Default::default() })
		}
	}

	fn row(close: Decimal) -> OhlcRow {
		OhlcRow { open: close, high: close, low: close, close, adj_close: close, volume: 100 }
	}

	fn service_with_frame(frame: PriceFrame) -> PriceService {
		let fetcher = MarketDataFetcher::new(
			Box::new(StubClient { frame }),
			Box::new(StubClient { frame: PriceFrame::new() }),
			Box::new(StubClient { frame: PriceFrame::new() }),
			HashMap::new(),
		);
		PriceService::new(fetcher, PriceCache::new(Duration::from_secs(3600), Duration::from_secs(3600), 64), MarketCalendar::new())
	}

	#[tokio::test]
	async fn historical_close_falls_back_to_widening_window() {
		let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let mut frame = PriceFrame::new();
		frame.insert(date - chrono::Duration::days(2), row(dec!(100)));
		let service = service_with_frame(frame);
		let close = service.get_historical_close("AAPL", date).await;
		assert_eq!(close, Some(dec!(100)));
	}

	#[tokio::test]
	async fn historical_close_returns_none_when_nothing_in_any_window() {
		let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let service = service_with_frame(PriceFrame::new());
		let close = service.get_historical_close("AAPL", date).await;
		assert!(close.is_none());
	}

	#[tokio::test]
	async fn update_positions_with_prices_keeps_prior_price_on_fetch_failure() {
		let service = service_with_frame(PriceFrame::new());
		let position = Position::new("AAPL", dec!(10), dec!(100), "USD").with_price(dec!(150));
		let updated = service.update_positions_with_prices(vec![position], PriceMode::Current).await;
		assert_eq!(updated[0].current_price, Some(dec!(150)));
	}

	#[test]
	fn should_update_portfolio_skips_on_a_non_trading_day_with_no_gap() {
		let calendar = MarketCalendar::new();
		let service = PriceService::new(
			MarketDataFetcher::new(
				Box::new(StubClient { frame: PriceFrame::new() }),
				Box::new(StubClient { frame: PriceFrame::new() }),
				Box::new(StubClient { frame: PriceFrame::new() }),
				HashMap::new(),
			),
			PriceCache::default(),
			calendar,
		);
		let saturday = NaiveDate::from_ymd_opt(2026, 7, 25).unwrap();
		let snapshot = PortfolioSnapshot::new("main", crate::calendar::eastern_time(saturday - chrono::Duration::days(1), 16, 0), vec![]);
		let now = crate::calendar::eastern_time(saturday, 12, 0);
		let (should_update, _reason) = service.should_update_portfolio(Some(&snapshot), saturday, now);
		assert!(!should_update);
	}

	fn calendar_service() -> PriceService {
		PriceService::new(
			MarketDataFetcher::new(
				Box::new(StubClient { frame: PriceFrame::new() }),
				Box::new(StubClient { frame: PriceFrame::new() }),
				Box::new(StubClient { frame: PriceFrame::new() }),
				HashMap::new(),
			),
			PriceCache::default(),
			MarketCalendar::new(),
		)
	}

	#[test]
	fn should_update_portfolio_refreshes_when_todays_snapshot_is_intraday_and_market_is_open() {
		let service = calendar_service();
		let trading_day = NaiveDate::from_ymd_opt(2026, 7, 22).unwrap();
		let snapshot = PortfolioSnapshot::new("main", crate::calendar::eastern_time(trading_day, 11, 0), vec![]);
		let now = crate::calendar::eastern_time(trading_day, 11, 30);
		let (should_update, _reason) = service.should_update_portfolio(Some(&snapshot), trading_day, now);
		assert!(should_update);
	}

	#[test]
	fn should_update_portfolio_skips_when_market_closed_and_already_at_market_close() {
		let service = calendar_service();
		let trading_day = NaiveDate::from_ymd_opt(2026, 7, 22).unwrap();
		let snapshot = PortfolioSnapshot::new("main", crate::calendar::eastern_time(trading_day, 16, 0), vec![]);
		let now = crate::calendar::eastern_time(trading_day, 18, 0);
		let (should_update, _reason) = service.should_update_portfolio(Some(&snapshot), trading_day, now);
		assert!(!should_update);
	}

	#[test]
	fn should_update_portfolio_overwrites_an_intraday_snapshot_once_market_closes() {
		let service = calendar_service();
		let trading_day = NaiveDate::from_ymd_opt(2026, 7, 22).unwrap();
		let snapshot = PortfolioSnapshot::new("main", crate::calendar::eastern_time(trading_day, 11, 0), vec![]);
		let now = crate::calendar::eastern_time(trading_day, 18, 0);
		let (should_update, _reason) = service.should_update_portfolio(Some(&snapshot), trading_day, now);
		assert!(should_update);
	}
}
