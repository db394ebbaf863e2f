//! Wraps a primary (authoritative, read-from) and secondary (write-only)
//! backend behind the same `Repository` trait. No two-phase commit:
//! a partial failure is logged and reported, never rolled back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::RepositoryError;
use crate::model::{MarketData, PortfolioSnapshot, Position, Trade};

use super::{DateRange, Repository};

/// Per-operation outcome of a dual write.
#[derive(Debug, Clone, Default)]
pub struct WriteResult {
	pub primary_ok: bool,
	pub secondary_ok: bool,
	pub errors: Vec<String>,
}

impl WriteResult {
	pub fn is_full_success(&self) -> bool {
		self.primary_ok && self.secondary_ok
	}

	pub fn is_partial_failure(&self) -> bool {
		self.primary_ok != self.secondary_ok
	}
}

pub struct DualWriteRepository {
	primary: Box<dyn Repository>,
	secondary: Box<dyn Repository>,
}

impl DualWriteRepository {
	pub fn new(primary: Box<dyn Repository>, secondary: Box<dyn Repository>) -> DualWriteRepository {
		DualWriteRepository { primary, secondary }
	}

	/// Combines the two backends' outcomes for one logical write, logging
	/// (but not rolling back) a partial failure.
	fn combine(operation_name: &str, primary: Result<(), RepositoryError>, secondary: Result<(), RepositoryError>) -> WriteResult {
		let mut result = WriteResult::default();
		match primary {
			Ok(()) => result.primary_ok = true,
			Err(error) => result.errors.push(format!("primary: {error}")),
		}
		match secondary {
			Ok(()) => result.secondary_ok = true,
			Err(error) => result.errors.push(format!("secondary: {error}")),
		}
		if result.is_partial_failure() {
			warn!(operation = operation_name, ?result, "dual write partial failure");
		}
		result
	}
}

#[async_trait]
impl Repository for DualWriteRepository {
	async fn get_portfolio_data(&self, date_range: Option<DateRange>) -> Result<Vec<PortfolioSnapshot>, RepositoryError> {
		self.primary.get_portfolio_data(date_range).await
	}

	async fn get_latest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>, RepositoryError> {
		self.primary.get_latest_portfolio_snapshot().await
	}

	/// Returns `Ok` only when the primary write succeeded; a primary failure
	/// is surfaced as an error, a secondary-only failure is logged but the
	/// call still reports success (the primary remains authoritative).
	async fn save_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot, is_trade_execution: bool) -> Result<(), RepositoryError> {
		let primary = self.primary.save_portfolio_snapshot(snapshot, is_trade_execution).await;
		let secondary = self.secondary.save_portfolio_snapshot(snapshot, is_trade_execution).await;
		self.require_primary(Self::combine("save_portfolio_snapshot", primary, secondary))
	}

	async fn update_daily_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot, is_trade_execution: bool) -> Result<(), RepositoryError> {
		let primary = self.primary.update_daily_portfolio_snapshot(snapshot, is_trade_execution).await;
		let secondary = self.secondary.update_daily_portfolio_snapshot(snapshot, is_trade_execution).await;
		self.require_primary(Self::combine("update_daily_portfolio_snapshot", primary, secondary))
	}

	async fn get_trade_history(&self, ticker: Option<&str>, date_range: Option<DateRange>) -> Result<Vec<Trade>, RepositoryError> {
		self.primary.get_trade_history(ticker, date_range).await
	}

	async fn save_trade(&self, trade: &Trade) -> Result<(), RepositoryError> {
		let primary = self.primary.save_trade(trade).await;
		let secondary = self.secondary.save_trade(trade).await;
		self.require_primary(Self::combine("save_trade", primary, secondary))
	}

	async fn get_positions_by_ticker(&self, ticker: &str) -> Result<Vec<Position>, RepositoryError> {
		self.primary.get_positions_by_ticker(ticker).await
	}

	async fn get_market_data(&self, ticker: &str, date_range: Option<DateRange>) -> Result<Vec<MarketData>, RepositoryError> {
		self.primary.get_market_data(ticker, date_range).await
	}

	async fn save_market_data(&self, market_data: &MarketData) -> Result<(), RepositoryError> {
		let primary = self.primary.save_market_data(market_data).await;
		let secondary = self.secondary.save_market_data(market_data).await;
		self.require_primary(Self::combine("save_market_data", primary, secondary))
	}

	async fn backup_data(&self, backup_path: &std::path::Path) -> Result<(), RepositoryError> {
		self.primary.backup_data(backup_path).await
	}

	async fn restore_from_backup(&self, backup_path: &std::path::Path) -> Result<(), RepositoryError> {
		self.primary.restore_from_backup(backup_path).await
	}

	/// Reconciliation diagnostic: compares both sides' snapshot
	/// dates and trade counts, surfacing divergence as issue strings rather
	/// than attempting to repair it automatically.
	async fn validate_data_integrity(&self) -> Result<Vec<String>, RepositoryError> {
		let mut issues = self.primary.validate_data_integrity().await?;
		issues.extend(self.reconcile().await?);
		Ok(issues)
	}

	async fn update_ticker_in_future_snapshots(&self, ticker: &str, from_timestamp: DateTime<Utc>) -> Result<(), RepositoryError> {
		let primary = self.primary.update_ticker_in_future_snapshots(ticker, from_timestamp).await;
		let secondary = self.secondary.update_ticker_in_future_snapshots(ticker, from_timestamp).await;
		self.require_primary(Self::combine("update_ticker_in_future_snapshots", primary, secondary))
	}
}

impl DualWriteRepository {
	fn require_primary(&self, result: WriteResult) -> Result<(), RepositoryError> {
		if result.primary_ok {
			Ok(())
		} else {
			Err(RepositoryError::Validation(result.errors.join("; ")))
		}
	}

	/// Diagnostic-only comparison between the two backends; never mutates
	/// either side. Reconciliation is offered here as an on-demand
	/// diagnostic, not an automatic background job.
	pub async fn reconcile(&self) -> Result<Vec<String>, RepositoryError> {
		let mut issues = Vec::new();
		let primary_snapshots = self.primary.get_portfolio_data(None).await?;
		let secondary_snapshots = self.secondary.get_portfolio_data(None).await?;
		let primary_dates: std::collections::HashSet<_> = primary_snapshots.iter().map(|s| s.calendar_date()).collect();
		let secondary_dates: std::collections::HashSet<_> = secondary_snapshots.iter().map(|s| s.calendar_date()).collect();
		for date in primary_dates.symmetric_difference(&secondary_dates) {
			issues.push(format!("snapshot date {date} present on only one backend"));
		}

		let primary_trades = self.primary.get_trade_history(None, None).await?;
		let secondary_trades = self.secondary.get_trade_history(None, None).await?;
		if primary_trades.len() != secondary_trades.len() {
			issues.push(format!(
				"trade count diverges between backends: primary={}, secondary={}",
				primary_trades.len(),
				secondary_trades.len()
			));
		}
		Ok(issues)
	}
}
