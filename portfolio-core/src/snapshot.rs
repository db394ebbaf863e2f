//! Snapshot loading, duplicate detection and integrity validation.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::decimal::approx_eq;
use crate::error::RepositoryError;
use crate::model::PortfolioSnapshot;
use crate::repository::{DateRange, Repository};

const COST_BASIS_TOLERANCE: Decimal = dec!(0.01);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateMode {
	Strict,
	Lenient,
}

pub struct SnapshotManager<'a> {
	repository: &'a dyn Repository,
	duplicate_mode: DuplicateMode,
}

impl<'a> SnapshotManager<'a> {
	pub fn new(repository: &'a dyn Repository, duplicate_mode: DuplicateMode) -> SnapshotManager<'a> {
		SnapshotManager { repository, duplicate_mode }
	}

	/// Loads snapshots ascending by timestamp, enforcing the one-snapshot-
	/// per-(fund, date) invariant. A violation is fatal in
	/// `Strict` mode and a logged warning in `Lenient` mode.
	pub async fn load(&self, date_range: Option<DateRange>) -> Result<Vec<PortfolioSnapshot>, RepositoryError> {
		let mut snapshots = self.repository.get_portfolio_data(date_range).await?;
		snapshots.sort_by_key(|s| s.timestamp);

		let mut seen_dates = std::collections::HashSet::new();
		for snapshot in &snapshots {
			let date = snapshot.calendar_date();
			if !seen_dates.insert(date) {
				let message = format!("duplicate snapshot for calendar date {date}");
				match self.duplicate_mode {
					DuplicateMode::Strict => return Err(RepositoryError::Corruption(message)),
					DuplicateMode::Lenient => tracing::warn!("{message}"),
				}
			}
		}
		Ok(snapshots)
	}

	/// Per-snapshot integrity checks: no duplicate tickers, no
	/// negative shares, derived fields within tolerance.
	pub fn validate(snapshot: &PortfolioSnapshot) -> Vec<String> {
		let mut issues = Vec::new();
		let mut seen_tickers = std::collections::HashSet::new();
		let mut total_market_value = Decimal::ZERO;
		let mut any_market_value = false;

		for position in &snapshot.positions {
			if !seen_tickers.insert(position.ticker.clone()) {
				issues.push(format!("duplicate ticker {} in snapshot", position.ticker));
			}
			if position.shares < Decimal::ZERO {
				issues.push(format!("negative shares for {}", position.ticker));
			}
			let expected_cost_basis = position.avg_price * position.shares;
			if !approx_eq(position.cost_basis, expected_cost_basis, COST_BASIS_TOLERANCE) {
				issues.push(format!("cost_basis mismatch for {}: {} vs expected {}", position.ticker, position.cost_basis, expected_cost_basis));
			}
			if let (Some(current_price), Some(market_value)) = (position.current_price, position.market_value) {
				let expected_market_value = current_price * position.shares;
				if !approx_eq(market_value, expected_market_value, COST_BASIS_TOLERANCE) {
					issues.push(format!("market_value mismatch for {}", position.ticker));
				}
				total_market_value += market_value;
				any_market_value = true;
			}
			if let (Some(market_value), Some(unrealized_pnl)) = (position.market_value, position.unrealized_pnl) {
				let expected_pnl = market_value - position.cost_basis;
				if !approx_eq(unrealized_pnl, expected_pnl, COST_BASIS_TOLERANCE) {
					issues.push(format!("unrealized_pnl mismatch for {}", position.ticker));
				}
			}
		}

		if any_market_value {
			if let Some(total_value) = snapshot.total_value {
				if !approx_eq(total_value, total_market_value, COST_BASIS_TOLERANCE) {
					issues.push(format!("snapshot total_value {total_value} does not match sum of position market values {total_market_value}"));
				}
			}
		}

		issues
	}
}
