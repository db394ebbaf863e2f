//! Executes buys and sells against the repository and the latest snapshot,
//! routing a backdated trade into `HistoricalRebuilder` instead of mutating
//! today's positions.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::cache::PriceCache;
use crate::calendar::MarketCalendar;
use crate::error::TradeProcessorError;
use crate::lot_engine::LotEngine;
use crate::model::{Action, PortfolioSnapshot, Position, Trade};
use crate::price_service::PriceService;
use crate::rebuilder::HistoricalRebuilder;
use crate::repository::Repository;

/// Below this remaining market value a sell is treated as having closed the
/// position in all but name; the engine auto-closes it with a zero-out
/// cleanup trade rather than leaving a stray fractional row.
const DUST_THRESHOLD: Decimal = dec!(1.00);
const DUST_CLEANUP_PRICE: Decimal = dec!(0.01);

pub struct TradeProcessor<'a> {
	repository: &'a dyn Repository,
	price_service: &'a PriceService,
	calendar: MarketCalendar,
}

impl<'a> TradeProcessor<'a> {
	pub fn new(repository: &'a dyn Repository, price_service: &'a PriceService) -> TradeProcessor<'a> {
		TradeProcessor { repository, price_service, calendar: MarketCalendar::new() }
	}

	/// Buy flow: validate, persist the trade, then either mutate the
	/// current snapshot or hand off to the rebuilder when backdated.
	pub async fn execute_buy(
		&self,
		ticker: &str,
		shares: Decimal,
		price: Decimal,
		timestamp: DateTime<Utc>,
		currency: &str,
		reason: &str,
		stop_loss: Option<Decimal>,
	) -> Result<Trade, TradeProcessorError> {
		if ticker.is_empty() || shares <= Decimal::ZERO || price <= Decimal::ZERO {
			return Err(TradeProcessorError::Validation("ticker, shares, and price must be valid".to_string()));
		}
		let trade = Trade::new_buy(self.fund(), ticker, shares, price, timestamp, currency, reason)?;
		self.repository.save_trade(&trade).await?;
		self.update_position_after_buy(&trade, stop_loss).await?;
		info!(ticker, %shares, %price, "buy trade executed");
		Ok(trade)
	}

	/// Sell flow: validates against the current snapshot, computes realized
	/// P&L by replaying the ticker's trade history through the FIFO lot
	/// engine (oldest lots consumed first), persists the trade with that
	/// figure, then mutates or rebuilds the snapshot as appropriate. The
	/// snapshot's `avg_price` stays running-average-cost for display; only
	/// the persisted `realized_pnl`/`cost_basis` come from FIFO.
	pub async fn execute_sell(
		&self,
		ticker: &str,
		shares: Decimal,
		price: Decimal,
		timestamp: DateTime<Utc>,
		currency: &str,
		reason: &str,
		validate_shares: bool,
	) -> Result<Trade, TradeProcessorError> {
		if ticker.is_empty() || shares <= Decimal::ZERO || price <= Decimal::ZERO {
			return Err(TradeProcessorError::Validation("ticker, shares, and price must be valid".to_string()));
		}

		let current_position = self.current_position(ticker).await?;
		if validate_shares {
			let available = current_position.as_ref().map(|p| p.shares).unwrap_or(Decimal::ZERO);
			if available < shares {
				return Err(TradeProcessorError::InsufficientShares { ticker: ticker.to_string(), requested: shares, available });
			}
		}

		let (cost_basis, realized_pnl) = self.fifo_realized_pnl(ticker, shares, price, timestamp).await?;

		let trade = Trade::new_sell(self.fund(), ticker, shares, price, timestamp, currency, reason, cost_basis, realized_pnl)?;
		self.repository.save_trade(&trade).await?;
		self.update_position_after_sell(&trade).await?;
		info!(ticker, %shares, %price, %realized_pnl, "sell trade executed");
		Ok(trade)
	}

	/// Rebuilds the ticker's FIFO lot queue from its full trade history and
	/// consumes `shares` at `price`, returning the aggregated cost basis sold
	/// and realized P&L across every lot slice the sale touched. When the
	/// trade log holds fewer shares than the sell (a snapshot/log drift, or a
	/// position opened outside the trade log), falls back to treating the
	/// whole sale as a single lot at the current average cost so the sell
	/// still completes rather than erroring out an otherwise-valid snapshot
	/// mutation.
	async fn fifo_realized_pnl(&self, ticker: &str, shares: Decimal, price: Decimal, timestamp: DateTime<Utc>) -> Result<(Decimal, Decimal), TradeProcessorError> {
		let trades = self.repository.get_trade_history(Some(ticker), None).await?;
		let mut engine = LotEngine::rebuild_from_trades(&trades);

		if engine.remaining_shares(ticker) < shares {
			let position = self.current_position(ticker).await?;
			let cost_basis = position.map(|p| p.avg_price * shares).unwrap_or(Decimal::ZERO);
			return Ok((cost_basis, price * shares - cost_basis));
		}

		let slices = engine.sell_fifo(ticker, shares, price, timestamp)?;
		let cost_basis: Decimal = slices.iter().map(|slice| slice.cost_basis_sold).sum();
		let realized_pnl: Decimal = slices.iter().map(|slice| slice.realized_pnl).sum();
		Ok((cost_basis, realized_pnl))
	}

	/// Sells the full current position if `current_price` has breached
	/// `stop_loss_price`; a no-op (returning `None`) otherwise or when there
	/// is no position to sell.
	pub async fn execute_stop_loss_sell(&self, ticker: &str, current_price: Decimal, stop_loss_price: Decimal) -> Result<Option<Trade>, TradeProcessorError> {
		if current_price > stop_loss_price {
			return Ok(None);
		}
		let Some(position) = self.current_position(ticker).await? else {
			warn!(ticker, "stop loss triggered but no position found");
			return Ok(None);
		};
		if position.shares <= Decimal::ZERO {
			return Ok(None);
		}
		warn!(ticker, shares = %position.shares, "stop loss triggered");
		let trade = self
			.execute_sell(
				ticker,
				position.shares,
				current_price,
				Utc::now(),
				&position.currency,
				"AUTOMATED SELL - STOP LOSS TRIGGERED",
				false,
			)
			.await?;
		Ok(Some(trade))
	}

	/// Unified entry point: persists the trade unless the caller
	/// already did, applies it to the snapshot, invalidates caches for the
	/// traded ticker, and triggers a rebuild when backdated.
	pub async fn process_trade_entry(&self, trade: &Trade, cache: Option<&PriceCache>, already_saved: bool) -> Result<(), TradeProcessorError> {
		if !already_saved {
			self.repository.save_trade(trade).await?;
		}
		match trade.action {
			Action::Buy => self.update_position_after_buy(trade, None).await?,
			Action::Sell => self.update_position_after_sell(trade).await?,
		}
		if let Some(cache) = cache {
			cache.invalidate_ticker(&trade.ticker);
		}
		Ok(())
	}

	async fn update_position_after_buy(&self, trade: &Trade, stop_loss: Option<Decimal>) -> Result<(), TradeProcessorError> {
		if self.is_backdated(trade.timestamp) {
			self.rebuild_from(trade.trade_date()).await?;
			return Ok(());
		}

		let mut snapshot = self.latest_snapshot_or_new(trade.timestamp).await?;
		let updated = match snapshot.position(&trade.ticker) {
			Some(existing) => {
				let total_shares = existing.shares + trade.shares;
				let total_cost = existing.cost_basis + trade.cost_basis;
				let mut position = Position::new(trade.ticker.as_str(), total_shares, average(total_cost, total_shares), trade.currency.as_str());
				position.cost_basis = total_cost;
				position.company = existing.company.clone();
				position.stop_loss = stop_loss.or(existing.stop_loss);
				position
			}
			None => {
				let mut position = Position::new(trade.ticker.as_str(), trade.shares, trade.price, trade.currency.as_str());
				position.cost_basis = trade.cost_basis;
				position.stop_loss = stop_loss;
				position
			}
		};
		snapshot.add_position(updated);
		snapshot.timestamp = trade.timestamp;
		self.repository.save_portfolio_snapshot(&snapshot, true).await?;
		Ok(())
	}

	async fn update_position_after_sell(&self, trade: &Trade) -> Result<(), TradeProcessorError> {
		if self.is_backdated(trade.timestamp) {
			self.rebuild_from(trade.trade_date()).await?;
			return Ok(());
		}

		let Some(mut snapshot) = self.repository.get_latest_portfolio_snapshot().await? else {
			warn!(ticker = %trade.ticker, "no portfolio snapshot found for sell trade update");
			return Ok(());
		};
		let Some(existing) = snapshot.position(&trade.ticker).cloned() else {
			warn!(ticker = %trade.ticker, "no existing position found for sell trade");
			return Ok(());
		};

		let remaining_shares = existing.shares - trade.shares;
		if remaining_shares <= Decimal::ZERO {
			let mut closed = Position::closed(trade.ticker.as_str(), trade.currency.as_str());
			closed.company = existing.company.clone();
			snapshot.add_position(closed);
		} else {
			let mut position = Position::new(trade.ticker.as_str(), remaining_shares, existing.avg_price, trade.currency.as_str());
			position.cost_basis = existing.avg_price * remaining_shares;
			position.company = existing.company.clone();
			position.stop_loss = existing.stop_loss;
			snapshot.add_position(position);

			if remaining_shares * trade.price < DUST_THRESHOLD {
				self.auto_close_dust(&mut snapshot, &trade.ticker, &trade.currency, remaining_shares, trade.timestamp).await?;
			}
		}

		snapshot.timestamp = trade.timestamp;
		self.repository.save_portfolio_snapshot(&snapshot, true).await?;
		self.repository.update_ticker_in_future_snapshots(&trade.ticker, trade.timestamp).await?;
		Ok(())
	}

	/// Appends a zero-out cleanup trade and folds the dust into the closed
	/// position in the same snapshot mutation. There is no
	/// interactive prompt at this layer, so the engine always auto-closes;
	/// a caller-facing confirmation step belongs above this crate.
	async fn auto_close_dust(&self, snapshot: &mut PortfolioSnapshot, ticker: &str, currency: &str, remaining_shares: Decimal, timestamp: DateTime<Utc>) -> Result<(), TradeProcessorError> {
		let cleanup = Trade::new_sell(
			self.fund(),
			ticker,
			remaining_shares,
			DUST_CLEANUP_PRICE,
			timestamp,
			currency,
			format!("POSITION CLEANUP - close remaining {remaining_shares} shares"),
			Decimal::ZERO,
			Decimal::ZERO,
		)?;
		self.repository.save_trade(&cleanup).await?;
		let mut closed = Position::closed(ticker, currency);
		if let Some(existing) = snapshot.position(ticker) {
			closed.company = existing.company.clone();
		}
		snapshot.add_position(closed);
		info!(ticker, %remaining_shares, "auto-closed dust remainder with cleanup trade");
		Ok(())
	}

	async fn rebuild_from(&self, date: NaiveDate) -> Result<(), TradeProcessorError> {
		info!(%date, "backdated trade detected, rebuilding historical snapshots");
		let rebuilder = HistoricalRebuilder::new(self.repository, self.price_service);
		rebuilder.rebuild_from(self.fund(), date).await?;
		Ok(())
	}

	async fn current_position(&self, ticker: &str) -> Result<Option<Position>, TradeProcessorError> {
		match self.repository.get_latest_portfolio_snapshot().await {
			Ok(Some(snapshot)) => Ok(snapshot.position(ticker).cloned()),
			Ok(None) => Ok(None),
			Err(error) => {
				warn!(ticker, %error, "failed to get current position");
				Ok(None)
			}
		}
	}

	async fn latest_snapshot_or_new(&self, timestamp: DateTime<Utc>) -> Result<PortfolioSnapshot, TradeProcessorError> {
		match self.repository.get_latest_portfolio_snapshot().await? {
			Some(snapshot) => Ok(snapshot),
			None => Ok(PortfolioSnapshot::new(self.fund(), timestamp, Vec::new())),
		}
	}

	fn is_backdated(&self, timestamp: DateTime<Utc>) -> bool {
		let trade_date = timestamp.with_timezone(&self.calendar.trading_timezone()).date_naive();
		let today = Utc::now().with_timezone(&self.calendar.trading_timezone()).date_naive();
		trade_date < today
	}

	/// `TradeProcessor` is constructed per fund; this default is fine for a
	/// single-fund repository and is simply the string every trade/snapshot
	/// built here gets stamped with.
	fn fund(&self) -> &str {
		"main"
	}
}

fn average(cost: Decimal, shares: Decimal) -> Decimal {
	if shares > Decimal::ZERO {
		cost / shares
	} else {
		Decimal::ZERO
	}
}

impl Trade {
	fn trade_date(&self) -> NaiveDate {
		self.timestamp.with_timezone(&crate::calendar::trading_timezone()).date_naive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::calendar::eastern_time;
	use crate::cache::PriceCache;
	use crate::fetcher::{MarketDataFetcher, VendorClient};
	use crate::model::{FundamentalsRecord, PriceFrame};
	use crate::repository::LocalFileRepository;
	use async_trait::async_trait;
	use chrono::NaiveDate;
	use std::collections::HashMap;
	use std::time::Duration;

	struct EmptyClient;

	#[async_trait]
	impl VendorClient for EmptyClient {
		async fn fetch_price_history(&self, _ticker: &str, _start: NaiveDate, _end: NaiveDate) -> Result<PriceFrame, crate::error::FetchError> {
			Ok(PriceFrame::new())
		}
		async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsRecord, crate::error::FetchError> {
			Ok(FundamentalsRecord { ticker: ticker.to_string(),..Default::default() })
		}
	}

	fn price_service() -> PriceService {
		let fetcher = MarketDataFetcher::new(Box::new(EmptyClient), Box::new(EmptyClient), Box::new(EmptyClient), HashMap::new());
		PriceService::new(fetcher, PriceCache::new(Duration::from_secs(3600), Duration::from_secs(3600), 64), MarketCalendar::new())
	}

	#[tokio::test]
	async fn buy_then_buy_averages_cost_basis() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let service = price_service();
		let processor = TradeProcessor::new(&repository, &service);

		let now = Utc::now();
		processor.execute_buy("AAPL", dec!(10), dec!(100), now, "USD", "buy", None).await.unwrap();
		processor.execute_buy("AAPL", dec!(10), dec!(200), now, "USD", "buy", None).await.unwrap();

		let snapshot = repository.get_latest_portfolio_snapshot().await.unwrap().unwrap();
		let position = snapshot.position("AAPL").unwrap();
		assert_eq!(position.shares, dec!(20));
		assert_eq!(position.avg_price, dec!(150));
	}

	#[tokio::test]
	async fn sell_more_than_held_is_rejected_when_validated() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let service = price_service();
		let processor = TradeProcessor::new(&repository, &service);

		let now = Utc::now();
		processor.execute_buy("AAPL", dec!(5), dec!(100), now, "USD", "buy", None).await.unwrap();
		let result = processor.execute_sell("AAPL", dec!(10), dec!(110), now, "USD", "sell", true).await;
		assert!(matches!(result, Err(TradeProcessorError::InsufficientShares {.. })));
	}

	#[tokio::test]
	async fn partial_sell_keeps_average_price_and_reduces_shares() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let service = price_service();
		let processor = TradeProcessor::new(&repository, &service);

		let now = Utc::now();
		processor.execute_buy("AAPL", dec!(10), dec!(100), now, "USD", "buy", None).await.unwrap();
		processor.execute_sell("AAPL", dec!(4), dec!(150), now, "USD", "sell", true).await.unwrap();

		let snapshot = repository.get_latest_portfolio_snapshot().await.unwrap().unwrap();
		let position = snapshot.position("AAPL").unwrap();
		assert_eq!(position.shares, dec!(6));
		assert_eq!(position.avg_price, dec!(100));
	}

	#[tokio::test]
	async fn selling_entire_position_retains_a_zero_share_row() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let service = price_service();
		let processor = TradeProcessor::new(&repository, &service);

		let now = Utc::now();
		processor.execute_buy("AAPL", dec!(10), dec!(100), now, "USD", "buy", None).await.unwrap();
		processor.execute_sell("AAPL", dec!(10), dec!(150), now, "USD", "sell", true).await.unwrap();

		let snapshot = repository.get_latest_portfolio_snapshot().await.unwrap().unwrap();
		let position = snapshot.position("AAPL").unwrap();
		assert!(position.is_closed());
	}

	#[tokio::test]
	async fn stop_loss_sell_is_a_noop_when_price_has_not_breached_it() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let service = price_service();
		let processor = TradeProcessor::new(&repository, &service);

		processor.execute_buy("AAPL", dec!(10), dec!(100), Utc::now(), "USD", "buy", None).await.unwrap();
		let result = processor.execute_stop_loss_sell("AAPL", dec!(120), dec!(90)).await.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test]
	async fn stop_loss_sell_liquidates_the_entire_position_when_triggered() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let service = price_service();
		let processor = TradeProcessor::new(&repository, &service);

		processor.execute_buy("AAPL", dec!(10), dec!(100), Utc::now(), "USD", "buy", None).await.unwrap();
		let trade = processor.execute_stop_loss_sell("AAPL", dec!(80), dec!(90)).await.unwrap().unwrap();
		assert_eq!(trade.shares, dec!(10));

		let snapshot = repository.get_latest_portfolio_snapshot().await.unwrap().unwrap();
		assert!(snapshot.position("AAPL").unwrap().is_closed());
	}

	#[tokio::test]
	async fn a_backdated_buy_triggers_a_rebuild_instead_of_mutating_todays_snapshot() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let service = price_service();
		let processor = TradeProcessor::new(&repository, &service);

		let last_week = eastern_time(Utc::now().date_naive() - chrono::Duration::days(7), 10, 0);
		processor.execute_buy("AAPL", dec!(10), dec!(100), last_week, "USD", "backdated buy", None).await.unwrap();

		let snapshots = repository.get_portfolio_data(None).await.unwrap();
		assert!(!snapshots.is_empty());
	}

	/// Buy 100 @ 100, buy 100 @ 120, sell 100 @ 130: FIFO consumes the
	/// cheaper lot first and realizes 3000.00, not the 2000.00 an
	/// average-cost (110.00) calculation would report.
	#[tokio::test]
	async fn realized_pnl_uses_fifo_not_average_cost_across_divergent_lots() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let service = price_service();
		let processor = TradeProcessor::new(&repository, &service);

		let now = Utc::now();
		processor.execute_buy("AAPL", dec!(100), dec!(100), now, "USD", "buy", None).await.unwrap();
		processor.execute_buy("AAPL", dec!(100), dec!(120), now, "USD", "buy more", None).await.unwrap();
		let trade = processor.execute_sell("AAPL", dec!(100), dec!(130), now, "USD", "sell", true).await.unwrap();

		assert_eq!(trade.realized_pnl, Some(dec!(3000)));
		assert_eq!(trade.cost_basis, dec!(10000));
	}

	#[tokio::test]
	async fn dust_remainder_is_auto_closed_with_a_cleanup_trade() {
		let dir = tempfile::tempdir().unwrap();
		let repository = LocalFileRepository::new("main", dir.path());
		let service = price_service();
		let processor = TradeProcessor::new(&repository, &service);

		let now = Utc::now();
		processor.execute_buy("AAPL", dec!(10), dec!(1), now, "USD", "buy", None).await.unwrap();
		processor.execute_sell("AAPL", dec!(9.99), dec!(1), now, "USD", "sell", true).await.unwrap();

		let snapshot = repository.get_latest_portfolio_snapshot().await.unwrap().unwrap();
		let position = snapshot.position("AAPL").unwrap();
		assert!(position.is_closed());
		let trades = repository.get_trade_history(Some("AAPL"), None).await.unwrap();
		assert!(trades.len() >= 3);
	}
}
