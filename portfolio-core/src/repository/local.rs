//! CSV-backed repository: one directory per fund, one file each for trades,
//! snapshots and cash. Every mutation rewrites its file in full,
//! write-to-temp-then-rename, so a reader never observes a partial write.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{round_money, round_shares};
use crate::error::RepositoryError;
use crate::model::{Action, MarketData, PortfolioSnapshot, Position, Source, Trade};

use super::{DateRange, Repository};

const TRADES_FILE: &str = "trades.csv";
const SNAPSHOTS_FILE: &str = "snapshots.csv";
const CASH_FILE: &str = "cash.csv";
const MARKET_DATA_FILE: &str = "market_data.csv";

/// One row of `trades.csv`, matching the legacy export header names.
#[derive(Debug, Serialize, Deserialize)]
struct TradeRow {
	#[serde(rename = "Date")]
	date: String,
	#[serde(rename = "Ticker")]
	ticker: String,
	#[serde(rename = "Shares Bought")]
	shares: Decimal,
	#[serde(rename = "Buy Price")]
	price: Decimal,
	#[serde(rename = "Cost Basis")]
	cost_basis: Decimal,
	#[serde(rename = "PnL")]
	pnl: Option<Decimal>,
	#[serde(rename = "Reason")]
	reason: String,
}

/// One row of `snapshots.csv`, matching the legacy export header names. One row per (ticker, date).
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
	#[serde(rename = "Date")]
	date: String,
	#[serde(rename = "Ticker")]
	ticker: String,
	#[serde(rename = "Shares")]
	shares: Decimal,
	#[serde(rename = "Average Price")]
	avg_price: Decimal,
	#[serde(rename = "Cost Basis")]
	cost_basis: Decimal,
	#[serde(rename = "Currency")]
	currency: String,
	#[serde(rename = "Company")]
	company: Option<String>,
	#[serde(rename = "Current Price")]
	current_price: Option<Decimal>,
	#[serde(rename = "Total Value")]
	total_value: Option<Decimal>,
	#[serde(rename = "PnL")]
	pnl: Option<Decimal>,
	#[serde(rename = "Stop Loss")]
	stop_loss: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CashRow {
	#[serde(rename = "Currency")]
	currency: String,
	#[serde(rename = "Amount")]
	amount: Decimal,
	#[serde(rename = "Date")]
	date: String,
}

pub struct LocalFileRepository {
	fund: String,
	directory: PathBuf,
}

impl LocalFileRepository {
	pub fn new(fund: impl Into<String>, directory: impl Into<PathBuf>) -> LocalFileRepository {
		LocalFileRepository {
			fund: fund.into(),
			directory: directory.into(),
		}
	}

	fn trades_path(&self) -> PathBuf {
		self.directory.join(TRADES_FILE)
	}

	fn snapshots_path(&self) -> PathBuf {
		self.directory.join(SNAPSHOTS_FILE)
	}

	fn cash_path(&self) -> PathBuf {
		self.directory.join(CASH_FILE)
	}

	fn market_data_path(&self) -> PathBuf {
		self.directory.join(MARKET_DATA_FILE)
	}

	/// Rewrites `path` atomically: serialize to a sibling `.tmp` file, then
	/// rename over the original. A reader either sees the old file or the
	/// new one, never a half-written one.
	fn write_atomic<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), RepositoryError> {
		fs::create_dir_all(path.parent().unwrap_or_else(|| Path::new(".")))?;
		let tmp_path = path.with_extension("csv.tmp");
		{
			let mut writer = csv::Writer::from_path(&tmp_path)?;
			for row in rows {
				writer.serialize(row)?;
			}
			writer.flush()?;
		}
		fs::rename(&tmp_path, path)?;
		Ok(())
	}

	fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, RepositoryError> {
		if !path.exists() {
			return Ok(Vec::new());
		}
		let mut reader = csv::Reader::from_path(path)?;
		let mut rows = Vec::new();
		for record in reader.deserialize() {
			let row: T = record?;
			rows.push(row);
		}
		Ok(rows)
	}

	fn trade_to_row(trade: &Trade) -> TradeRow {
		TradeRow {
			date: format_timestamp(trade.timestamp),
			ticker: trade.ticker.clone(),
			shares: round_shares(trade.shares),
			price: round_money(trade.price),
			cost_basis: round_money(trade.cost_basis),
			pnl: trade.realized_pnl.map(round_money),
			reason: trade.reason.clone(),
		}
	}

	fn row_to_trade(&self, row: TradeRow) -> Result<Trade, RepositoryError> {
		let action = Action::infer_from_reason(&row.reason);
		let timestamp = parse_timestamp(&row.date)?;
		Ok(Trade {
			trade_id: Uuid::new_v4(),
			ticker: row.ticker,
			action,
			shares: row.shares,
			price: row.price,
			timestamp,
			cost_basis: row.cost_basis,
			realized_pnl: row.pnl,
			reason: row.reason,
			currency: "USD".to_string(),
			fund: self.fund.clone(),
		})
	}

	fn position_to_row(timestamp: DateTime<Utc>, position: &Position) -> SnapshotRow {
		SnapshotRow {
			date: format_timestamp(timestamp),
			ticker: position.ticker.clone(),
			shares: round_shares(position.shares),
			avg_price: round_money(position.avg_price),
			cost_basis: round_money(position.cost_basis),
			currency: position.currency.clone(),
			company: position.company.clone(),
			current_price: position.current_price.map(round_money),
			total_value: position.market_value.map(round_money),
			pnl: position.unrealized_pnl.map(round_money),
			stop_loss: position.stop_loss.map(round_money),
		}
	}

	fn row_to_position(row: SnapshotRow) -> Position {
		Position {
			ticker: row.ticker,
			shares: row.shares,
			avg_price: row.avg_price,
			cost_basis: row.cost_basis,
			currency: row.currency,
			company: row.company,
			current_price: row.current_price,
			market_value: row.total_value,
			unrealized_pnl: row.pnl,
			stop_loss: row.stop_loss,
			daily_pnl: None,
			five_day_pnl: None,
		}
	}
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
	let eastern = timestamp.with_timezone(&crate::calendar::trading_timezone());
	format!("{} {}", eastern.format("%m/%d/%Y %H:%M"), eastern.offset())
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, RepositoryError> {
	let naive_part = text.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
	let naive = NaiveDateTime::parse_from_str(&naive_part, "%m/%d/%Y %H:%M")
		.map_err(|error| RepositoryError::Validation(format!("unparseable trade date {text:?}: {error}")))?;
	Ok(crate::calendar::trading_timezone()
		.from_local_datetime(&naive)
		.single()
		.ok_or_else(|| RepositoryError::Validation(format!("ambiguous local time {text:?}")))?
		.with_timezone(&Utc))
}

#[async_trait]
impl Repository for LocalFileRepository {
	async fn get_portfolio_data(&self, date_range: Option<DateRange>) -> Result<Vec<PortfolioSnapshot>, RepositoryError> {
		let rows: Vec<SnapshotRow> = Self::read_rows(&self.snapshots_path())?;
		let mut by_timestamp: std::collections::BTreeMap<DateTime<Utc>, Vec<Position>> = std::collections::BTreeMap::new();
		for row in rows {
			let timestamp = parse_timestamp(&row.date)?;
			by_timestamp.entry(timestamp).or_default().push(Self::row_to_position(row));
		}
		let mut snapshots = Vec::new();
		for (timestamp, positions) in by_timestamp {
			if let Some((start, end)) = date_range {
				if timestamp < start || timestamp > end {
					continue;
				}
			}
			snapshots.push(PortfolioSnapshot::new(self.fund.clone(), timestamp, positions));
		}
		snapshots.sort_by_key(|s| s.timestamp);
		Ok(snapshots)
	}

	async fn get_latest_portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>, RepositoryError> {
		let mut snapshots = self.get_portfolio_data(None).await?;
		Ok(snapshots.pop())
	}

	async fn save_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot, is_trade_execution: bool) -> Result<(), RepositoryError> {
		self.update_daily_portfolio_snapshot(snapshot, is_trade_execution).await
	}

	/// One snapshot per (fund, calendar date). Any existing row
	/// for the same calendar date is replaced; replacing a market-close
	/// snapshot with an intraday one is refused unless `is_trade_execution`.
	async fn update_daily_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot, is_trade_execution: bool) -> Result<(), RepositoryError> {
		let calendar_date = snapshot.calendar_date();
		let mut rows: Vec<SnapshotRow> = Self::read_rows(&self.snapshots_path())?;

		let mut existing_is_market_close = false;
		let mut keep = Vec::with_capacity(rows.len());
		for row in rows.drain(..) {
			let row_timestamp = parse_timestamp(&row.date)?;
			if row_timestamp.with_timezone(&crate::calendar::trading_timezone()).date_naive() == calendar_date {
				if PortfolioSnapshot::new(self.fund.clone(), row_timestamp, vec![]).is_market_close() {
					existing_is_market_close = true;
				}
				continue;
			}
			keep.push(row);
		}
		rows = keep;

		if existing_is_market_close && !snapshot.is_market_close() && !is_trade_execution {
			return Err(RepositoryError::Validation(
				"refusing to overwrite a market-close snapshot with an intraday one".to_string(),
			));
		}

		for position in &snapshot.positions {
			rows.push(Self::position_to_row(snapshot.timestamp, position));
		}
		Self::write_atomic(&self.snapshots_path(), &rows)
	}

	async fn get_trade_history(&self, ticker: Option<&str>, date_range: Option<DateRange>) -> Result<Vec<Trade>, RepositoryError> {
		let rows: Vec<TradeRow> = Self::read_rows(&self.trades_path())?;
		let mut trades = Vec::new();
		for row in rows {
			let trade = self.row_to_trade(row)?;
			if let Some(ticker) = ticker {
				if trade.ticker != ticker {
					continue;
				}
			}
			if let Some((start, end)) = date_range {
				if trade.timestamp < start || trade.timestamp > end {
					continue;
				}
			}
			trades.push(trade);
		}
		trades.sort_by_key(|t| t.timestamp);
		Ok(trades)
	}

	async fn save_trade(&self, trade: &Trade) -> Result<(), RepositoryError> {
		let mut rows: Vec<TradeRow> = Self::read_rows(&self.trades_path())?;
		rows.push(Self::trade_to_row(trade));
		Self::write_atomic(&self.trades_path(), &rows)
	}

	async fn get_positions_by_ticker(&self, ticker: &str) -> Result<Vec<Position>, RepositoryError> {
		let snapshots = self.get_portfolio_data(None).await?;
		Ok(snapshots
			.into_iter()
			.filter_map(|snapshot| snapshot.position(ticker).cloned())
			.collect())
	}

	async fn get_market_data(&self, ticker: &str, date_range: Option<DateRange>) -> Result<Vec<MarketData>, RepositoryError> {
		let rows: Vec<MarketDataRow> = Self::read_rows(&self.market_data_path())?;
		let mut out = Vec::new();
		for row in rows {
			if row.ticker != ticker {
				continue;
			}
			let md = row.into_market_data()?;
			if let Some((start, end)) = date_range {
				let at = crate::calendar::eastern_time(md.date, 16, 0);
				if at < start || at > end {
					continue;
				}
			}
			out.push(md);
		}
		Ok(out)
	}

	async fn save_market_data(&self, market_data: &MarketData) -> Result<(), RepositoryError> {
		let mut rows: Vec<MarketDataRow> = Self::read_rows(&self.market_data_path())?;
		rows.retain(|row| !(row.ticker == market_data.ticker && row.date == market_data.date.format("%Y-%m-%d").to_string()));
		rows.push(MarketDataRow::from_market_data(market_data));
		Self::write_atomic(&self.market_data_path(), &rows)
	}

	async fn backup_data(&self, backup_path: &Path) -> Result<(), RepositoryError> {
		fs::create_dir_all(backup_path)?;
		for file in [TRADES_FILE, SNAPSHOTS_FILE, CASH_FILE, MARKET_DATA_FILE] {
			let source = self.directory.join(file);
			if source.exists() {
				fs::copy(&source, backup_path.join(file))?;
			}
		}
		Ok(())
	}

	async fn restore_from_backup(&self, backup_path: &Path) -> Result<(), RepositoryError> {
		for file in [TRADES_FILE, SNAPSHOTS_FILE, CASH_FILE, MARKET_DATA_FILE] {
			let source = backup_path.join(file);
			if source.exists() {
				fs::create_dir_all(&self.directory)?;
				fs::copy(&source, self.directory.join(file))?;
			}
		}
		Ok(())
	}

	/// Checks the invariants of no duplicate tickers per date, no
	/// negative shares, and derived fields within tolerance.
	async fn validate_data_integrity(&self) -> Result<Vec<String>, RepositoryError> {
		let mut issues = Vec::new();
		let snapshots = self.get_portfolio_data(None).await?;
		let mut seen_dates = std::collections::HashSet::new();
		for snapshot in &snapshots {
			let date = snapshot.calendar_date();
			if !seen_dates.insert(date) {
				issues.push(format!("duplicate snapshot for {date}"));
			}
			let mut seen_tickers = std::collections::HashSet::new();
			for position in &snapshot.positions {
				if !seen_tickers.insert(position.ticker.clone()) {
					issues.push(format!("duplicate ticker {} in snapshot for {date}", position.ticker));
				}
				if position.shares < Decimal::ZERO {
					issues.push(format!("negative shares for {} on {date}", position.ticker));
				}
				let expected_cost_basis = position.avg_price * position.shares;
				if !crate::decimal::approx_eq(position.cost_basis, expected_cost_basis, Decimal::new(1, 2)) {
					issues.push(format!("cost_basis mismatch for {} on {date}", position.ticker));
				}
			}
		}
		Ok(issues)
	}

	/// Rewrites every snapshot at or after `from_timestamp` that already
	/// carries `ticker`, so a ticker-symbol correction made after the fact
	/// (e.g. a vendor rename) propagates forward.
	async fn update_ticker_in_future_snapshots(&self, ticker: &str, from_timestamp: DateTime<Utc>) -> Result<(), RepositoryError> {
		let snapshots = self.get_portfolio_data(None).await?;
		for snapshot in snapshots {
			if snapshot.timestamp < from_timestamp {
				continue;
			}
			if snapshot.position(ticker).is_some() {
				self.update_daily_portfolio_snapshot(&snapshot, true).await?;
			}
		}
		Ok(())
	}
}

#[derive(Debug, Serialize, Deserialize)]
struct MarketDataRow {
	#[serde(rename = "Ticker")]
	ticker: String,
	#[serde(rename = "Date")]
	date: String,
	#[serde(rename = "Open")]
	open: Decimal,
	#[serde(rename = "High")]
	high: Decimal,
	#[serde(rename = "Low")]
	low: Decimal,
	#[serde(rename = "Close")]
	close: Decimal,
	#[serde(rename = "Adj Close")]
	adj_close: Decimal,
	#[serde(rename = "Volume")]
	volume: i64,
	#[serde(rename = "Source")]
	source: String,
}

impl MarketDataRow {
	fn from_market_data(md: &MarketData) -> MarketDataRow {
		MarketDataRow {
			ticker: md.ticker.clone(),
			date: md.date.format("%Y-%m-%d").to_string(),
			open: round_money(md.open),
			high: round_money(md.high),
			low: round_money(md.low),
			close: round_money(md.close),
			adj_close: round_money(md.adj_close),
			volume: md.volume,
			source: md.source.to_string(),
		}
	}

	fn into_market_data(self) -> Result<MarketData, RepositoryError> {
		let date = chrono::NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
			.map_err(|error| RepositoryError::Validation(format!("unparseable market data date {:?}: {error}", self.date)))?;
		Ok(MarketData {
			ticker: self.ticker,
			date,
			open: self.open,
			high: self.high,
			low: self.low,
			close: self.close,
			adj_close: self.adj_close,
			volume: self.volume,
			source: Source::Cache,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rust_decimal_macros::dec;

	fn repo(dir: &Path) -> LocalFileRepository {
		LocalFileRepository::new("main", dir)
	}

	#[tokio::test]
	async fn trade_round_trips_through_csv_at_fixed_scale() {
		let dir = tempfile::tempdir().unwrap();
		let repository = repo(dir.path());
		let trade = Trade::new_buy("main", "AAPL", dec!(10.00001), dec!(100.005), Utc::now(), "USD", "Dip buy").unwrap();
		repository.save_trade(&trade).await.unwrap();
		let trades = repository.get_trade_history(None, None).await.unwrap();
		assert_eq!(trades.len(), 1);
		assert_eq!(trades[0].shares, dec!(10.0000));
		assert_eq!(trades[0].ticker, "AAPL");
	}

	#[tokio::test]
	async fn snapshot_upsert_by_ticker_and_date_does_not_duplicate_rows() {
		let dir = tempfile::tempdir().unwrap();
		let repository = repo(dir.path());
		let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let snapshot = PortfolioSnapshot::at_market_close("main", date, vec![Position::new("AAPL", dec!(10), dec!(100), "USD")]);
		repository.update_daily_portfolio_snapshot(&snapshot, false).await.unwrap();
		let updated = PortfolioSnapshot::at_market_close("main", date, vec![Position::new("AAPL", dec!(20), dec!(90), "USD")]);
		repository.update_daily_portfolio_snapshot(&updated, true).await.unwrap();
		let snapshots = repository.get_portfolio_data(None).await.unwrap();
		assert_eq!(snapshots.len(), 1);
		assert_eq!(snapshots[0].positions.len(), 1);
		assert_eq!(snapshots[0].positions[0].shares, dec!(20));
	}

	#[tokio::test]
	async fn intraday_update_is_refused_against_existing_market_close_without_trade_execution() {
		let dir = tempfile::tempdir().unwrap();
		let repository = repo(dir.path());
		let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let close_snapshot = PortfolioSnapshot::at_market_close("main", date, vec![Position::new("AAPL", dec!(10), dec!(100), "USD")]);
		repository.update_daily_portfolio_snapshot(&close_snapshot, false).await.unwrap();

		let intraday_timestamp = crate::calendar::eastern_time(date, 11, 0);
		let intraday_snapshot = PortfolioSnapshot::new("main", intraday_timestamp, vec![Position::new("AAPL", dec!(11), dec!(100), "USD")]);
		let result = repository.update_daily_portfolio_snapshot(&intraday_snapshot, false).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn backup_then_restore_round_trips_all_files() {
		let dir = tempfile::tempdir().unwrap();
		let repository = repo(dir.path());
		let trade = Trade::new_buy("main", "AAPL", dec!(10), dec!(100), Utc::now(), "USD", "Dip buy").unwrap();
		repository.save_trade(&trade).await.unwrap();

		let backup_dir = tempfile::tempdir().unwrap();
		repository.backup_data(backup_dir.path()).await.unwrap();

		let restore_dir = tempfile::tempdir().unwrap();
		let restored_repository = repo(restore_dir.path());
		restored_repository.restore_from_backup(backup_dir.path()).await.unwrap();
		let trades = restored_repository.get_trade_history(None, None).await.unwrap();
		assert_eq!(trades.len(), 1);
	}

	#[tokio::test]
	async fn validate_data_integrity_flags_negative_shares() {
		let dir = tempfile::tempdir().unwrap();
		let repository = repo(dir.path());
		let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let mut snapshot = PortfolioSnapshot::at_market_close("main", date, vec![]);
		snapshot.add_position(Position::new("AAPL", dec!(-5), dec!(100), "USD"));
		repository.update_daily_portfolio_snapshot(&snapshot, true).await.unwrap();
		let issues = repository.validate_data_integrity().await.unwrap();
		assert!(issues.iter().any(|issue| issue.contains("negative shares")));
	}
}
