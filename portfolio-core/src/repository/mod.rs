//! Backend-agnostic persistence contract. `LocalFileRepository` and
//! `RemoteDatabaseRepository` both implement `Repository`;
//! `DualWriteRepository` composes the two behind the same trait so callers
//! never need to know which backend(s) a fund is bound to.

pub mod dual_write;
pub mod local;
pub mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RepositoryError;
use crate::model::{MarketData, PortfolioSnapshot, Position, Trade};

pub use dual_write::{DualWriteRepository, WriteResult};
pub use local::LocalFileRepository;
pub use remote::RemoteDatabaseRepository;

pub type DateRange = (DateTime<Utc>, DateTime<Utc>);

#[async_trait]
pub trait Repository: Send + Sync {
	async fn get_portfolio_data(&self, date_range: Option<DateRange>) -> Result<Vec<PortfolioSnapshot>, RepositoryError>;

	async fn get_latest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>, RepositoryError>;

	/// Latest snapshot with `Position::daily_pnl`/`five_day_pnl` filled in
	/// from a join against prior snapshots, rather than re-derived from the
	/// current snapshot's own cost basis. The default falls back to the
	/// plain latest snapshot (fields left `None`); `RemoteDatabaseRepository`
	/// is the only backend with a stored history cheap enough to join
	/// against, so it is the only one that overrides this.
	async fn get_latest_portfolio_with_pnl(&self) -> Result<Option<PortfolioSnapshot>, RepositoryError> {
		self.get_latest_portfolio_snapshot().await
	}

	async fn save_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot, is_trade_execution: bool) -> Result<(), RepositoryError>;

	/// Upsert by (ticker, calendar date): never inserts a duplicate row for
	/// the same (ticker, date); refused against an existing market-close
	/// snapshot unless `is_trade_execution`.
	async fn update_daily_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot, is_trade_execution: bool) -> Result<(), RepositoryError>;

	async fn get_trade_history(&self, ticker: Option<&str>, date_range: Option<DateRange>) -> Result<Vec<Trade>, RepositoryError>;

	async fn save_trade(&self, trade: &Trade) -> Result<(), RepositoryError>;

	async fn get_positions_by_ticker(&self, ticker: &str) -> Result<Vec<Position>, RepositoryError>;

	async fn get_market_data(&self, ticker: &str, date_range: Option<DateRange>) -> Result<Vec<MarketData>, RepositoryError>;

	async fn save_market_data(&self, market_data: &MarketData) -> Result<(), RepositoryError>;

	async fn backup_data(&self, backup_path: &std::path::Path) -> Result<(), RepositoryError>;

	async fn restore_from_backup(&self, backup_path: &std::path::Path) -> Result<(), RepositoryError>;

	async fn validate_data_integrity(&self) -> Result<Vec<String>, RepositoryError>;

	/// Propagates a ticker correction made after a backdated trade
	/// forward into every snapshot at or after `from_timestamp`.
	async fn update_ticker_in_future_snapshots(&self, ticker: &str, from_timestamp: DateTime<Utc>) -> Result<(), RepositoryError>;
}
