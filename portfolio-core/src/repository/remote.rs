//! SQLite-backed repository: tables `trade_log`,
//! `portfolio_positions`, `cash_balances`, `market_data`, `funds`. Daily and
//! 5-day P&L are computed by `get_latest_portfolio_with_pnl`'s join against
//! prior snapshot rows, never re-derived from the current snapshot's own
//! cost basis.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use crate::decimal::{round_money, round_shares};
use crate::error::RepositoryError;
use crate::model::{Action, MarketData, PortfolioSnapshot, Position, Source, Trade};

use super::{DateRange, Repository};

pub struct RemoteDatabaseRepository {
	fund: String,
	connection: Mutex<Connection>,
}

impl RemoteDatabaseRepository {
	pub fn open(fund: impl Into<String>, sqlite_path: impl AsRef<Path>) -> Result<RemoteDatabaseRepository, RepositoryError> {
		let connection = Connection::open(sqlite_path.as_ref())?;
		let repository = RemoteDatabaseRepository {
			fund: fund.into(),
			connection: Mutex::new(connection),
		};
		repository.ensure_schema()?;
		Ok(repository)
	}

	pub fn path(&self) -> PathBuf {
		self.connection.lock().unwrap().path().map(PathBuf::from).unwrap_or_default()
	}

	fn ensure_schema(&self) -> Result<(), RepositoryError> {
		let connection = self.connection.lock().unwrap();
		connection.execute_batch(
			"
			CREATE TABLE IF NOT EXISTS funds (
				id TEXT PRIMARY KEY,
				base_currency TEXT NOT NULL,
				created_at TEXT NOT NULL
			);
			CREATE TABLE IF NOT EXISTS trade_log (
				trade_id TEXT PRIMARY KEY,
				fund TEXT NOT NULL,
				ticker TEXT NOT NULL,
				action TEXT NOT NULL,
				shares TEXT NOT NULL,
				price TEXT NOT NULL,
				timestamp TEXT NOT NULL,
				cost_basis TEXT NOT NULL,
				realized_pnl TEXT,
				reason TEXT NOT NULL,
				currency TEXT NOT NULL,
				created_at TEXT NOT NULL
			);
			CREATE TABLE IF NOT EXISTS portfolio_positions (
				fund TEXT NOT NULL,
				ticker TEXT NOT NULL,
				snapshot_date TEXT NOT NULL,
				timestamp TEXT NOT NULL,
				shares TEXT NOT NULL,
				avg_price TEXT NOT NULL,
				cost_basis TEXT NOT NULL,
				currency TEXT NOT NULL,
				company TEXT,
				current_price TEXT,
				market_value TEXT,
				unrealized_pnl TEXT,
				stop_loss TEXT,
				created_at TEXT NOT NULL,
				PRIMARY KEY (fund, ticker, snapshot_date)
			);
			CREATE TABLE IF NOT EXISTS cash_balances (
				fund TEXT NOT NULL,
				currency TEXT NOT NULL,
				amount TEXT NOT NULL,
				date TEXT NOT NULL,
				PRIMARY KEY (fund, currency, date)
			);
			CREATE TABLE IF NOT EXISTS market_data (
				ticker TEXT NOT NULL,
				date TEXT NOT NULL,
				open TEXT NOT NULL,
				high TEXT NOT NULL,
				low TEXT NOT NULL,
				close TEXT NOT NULL,
				adj_close TEXT NOT NULL,
				volume INTEGER NOT NULL,
				source TEXT NOT NULL,
				PRIMARY KEY (ticker, date)
			);
			",
		)?;
		Ok(())
	}

	fn decimal_to_text(value: Decimal) -> String {
		value.to_string()
	}

	fn text_to_decimal(text: &str) -> Result<Decimal, RepositoryError> {
		Decimal::from_str(text).map_err(|error| RepositoryError::Corruption(format!("unparseable decimal {text:?}: {error}")))
	}

	fn timestamp_to_text(timestamp: DateTime<Utc>) -> String {
		timestamp.to_rfc3339()
	}

	fn text_to_timestamp(text: &str) -> Result<DateTime<Utc>, RepositoryError> {
		DateTime::parse_from_rfc3339(text)
			.map(|dt| dt.with_timezone(&Utc))
			.map_err(|error| RepositoryError::Corruption(format!("unparseable timestamp {text:?}: {error}")))
	}

	/// Per-ticker `(daily_pnl, five_day_pnl)` joined against the latest
	/// snapshot date's own prior rows entirely in SQL: `recent_dates` ranks
	/// this fund's distinct `snapshot_date`s newest-first, and the two
	/// `LEFT JOIN`s pull in the row one rank back (yesterday's close) and
	/// five ranks back, per ticker. A ticker missing either join partner
	/// (new position, or fewer than six snapshots on record) gets `NULL`
	/// there and the corresponding P&L comes back `None`.
	fn daily_and_five_day_pnl(&self) -> Result<HashMap<String, (Option<Decimal>, Option<Decimal>)>, RepositoryError> {
		let connection = self.connection.lock().unwrap();
		let mut statement = connection.prepare(
			"WITH recent_dates AS (
				SELECT snapshot_date, ROW_NUMBER() OVER (ORDER BY snapshot_date DESC) AS rank
				FROM (SELECT DISTINCT snapshot_date FROM portfolio_positions WHERE fund = ?1)
			)
			SELECT cur.ticker, cur.unrealized_pnl, prev.unrealized_pnl, five.unrealized_pnl
			FROM portfolio_positions cur
			JOIN recent_dates cur_rank ON cur_rank.snapshot_date = cur.snapshot_date AND cur_rank.rank = 1
			LEFT JOIN recent_dates prev_rank ON prev_rank.rank = 2
			LEFT JOIN portfolio_positions prev
				ON prev.fund = cur.fund AND prev.ticker = cur.ticker AND prev.snapshot_date = prev_rank.snapshot_date
			LEFT JOIN recent_dates five_rank ON five_rank.rank = 6
			LEFT JOIN portfolio_positions five
				ON five.fund = cur.fund AND five.ticker = cur.ticker AND five.snapshot_date = five_rank.snapshot_date
			WHERE cur.fund = ?1",
		)?;
		let rows = statement.query_map(params![self.fund], |row| {
			Ok((
				row.get::<_, String>(0)?,
				row.get::<_, Option<String>>(1)?,
				row.get::<_, Option<String>>(2)?,
				row.get::<_, Option<String>>(3)?,
			))
		})?;
		let mut out = HashMap::new();
		for row in rows {
			let (ticker, current, previous, five_days_ago) = row?;
			let current = current.map(|v| Self::text_to_decimal(&v)).transpose()?;
			let previous = previous.map(|v| Self::text_to_decimal(&v)).transpose()?;
			let five_days_ago = five_days_ago.map(|v| Self::text_to_decimal(&v)).transpose()?;
			let daily_pnl = current.map(|cur| match previous {
				Some(prev) => cur - prev,
				None => cur,
			});
			let five_day_pnl = match (current, five_days_ago) {
				(Some(cur), Some(five)) => Some(cur - five),
				_ => None,
			};
			out.insert(ticker, (daily_pnl, five_day_pnl));
		}
		Ok(out)
	}
}

#[async_trait]
impl Repository for RemoteDatabaseRepository {
	async fn get_portfolio_data(&self, date_range: Option<DateRange>) -> Result<Vec<PortfolioSnapshot>, RepositoryError> {
		let connection = self.connection.lock().unwrap();
		let mut statement = connection.prepare(
			"SELECT snapshot_date, timestamp, ticker, shares, avg_price, cost_basis, currency, company, current_price, market_value, unrealized_pnl, stop_loss
			 FROM portfolio_positions WHERE fund = ?1 ORDER BY snapshot_date ASC",
		)?;
		let mut by_date: std::collections::BTreeMap<String, (DateTime<Utc>, Vec<Position>)> = std::collections::BTreeMap::new();
		let rows = statement.query_map(params![self.fund], |row| {
			Ok((
				row.get::<_, String>(0)?,
				row.get::<_, String>(1)?,
				row.get::<_, String>(2)?,
				row.get::<_, String>(3)?,
				row.get::<_, String>(4)?,
				row.get::<_, String>(5)?,
				row.get::<_, String>(6)?,
				row.get::<_, Option<String>>(7)?,
				row.get::<_, Option<String>>(8)?,
				row.get::<_, Option<String>>(9)?,
				row.get::<_, Option<String>>(10)?,
				row.get::<_, Option<String>>(11)?,
			))
		})?;
		for row in rows {
			let (snapshot_date, timestamp_text, ticker, shares, avg_price, cost_basis, currency, company, current_price, market_value, unrealized_pnl, stop_loss) = row?;
			let timestamp = Self::text_to_timestamp(&timestamp_text)?;
			let position = Position {
				ticker,
				shares: Self::text_to_decimal(&shares)?,
				avg_price: Self::text_to_decimal(&avg_price)?,
				cost_basis: Self::text_to_decimal(&cost_basis)?,
				currency,
				company,
				current_price: current_price.map(|v| Self::text_to_decimal(&v)).transpose()?,
				market_value: market_value.map(|v| Self::text_to_decimal(&v)).transpose()?,
				unrealized_pnl: unrealized_pnl.map(|v| Self::text_to_decimal(&v)).transpose()?,
				stop_loss: stop_loss.map(|v| Self::text_to_decimal(&v)).transpose()?,
				daily_pnl: None,
				five_day_pnl: None,
			};
			by_date.entry(snapshot_date).or_insert_with(|| (timestamp, Vec::new())).1.push(position);
		}
		let mut snapshots = Vec::new();
		for (_, (timestamp, positions)) in by_date {
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

	/// Joins the latest snapshot's positions against the row for the prior
	/// snapshot date and the row five snapshot dates back, per ticker, so
	/// `daily_pnl`/`five_day_pnl` reflect an actual historical baseline
	/// instead of collapsing to `unrealized_pnl` (the bug this join exists
	/// to prevent: see `Position::daily_pnl`'s doc comment).
	async fn get_latest_portfolio_with_pnl(&self) -> Result<Option<PortfolioSnapshot>, RepositoryError> {
		let Some(mut snapshot) = self.get_latest_portfolio_snapshot().await? else {
			return Ok(None);
		};
		let pnl_by_ticker = self.daily_and_five_day_pnl()?;
		for position in &mut snapshot.positions {
			if let Some((daily_pnl, five_day_pnl)) = pnl_by_ticker.get(&position.ticker) {
				position.daily_pnl = *daily_pnl;
				position.five_day_pnl = *five_day_pnl;
			}
		}
		Ok(Some(snapshot))
	}

	async fn save_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot, is_trade_execution: bool) -> Result<(), RepositoryError> {
		self.update_daily_portfolio_snapshot(snapshot, is_trade_execution).await
	}

	async fn update_daily_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot, is_trade_execution: bool) -> Result<(), RepositoryError> {
		let calendar_date = snapshot.calendar_date().format("%Y-%m-%d").to_string();
		let connection = self.connection.lock().unwrap();

		let existing_timestamp: Option<String> = connection
			.query_row(
				"SELECT timestamp FROM portfolio_positions WHERE fund = ?1 AND snapshot_date = ?2 LIMIT 1",
				params![self.fund, calendar_date],
				|row| row.get(0),
			)
			.optional()?;
		if let Some(existing_timestamp) = existing_timestamp {
			let existing_ts = Self::text_to_timestamp(&existing_timestamp)?;
			let existing_snapshot = PortfolioSnapshot::new(self.fund.clone(), existing_ts, vec![]);
			if existing_snapshot.is_market_close() && !snapshot.is_market_close() && !is_trade_execution {
				return Err(RepositoryError::Validation(
					"refusing to overwrite a market-close snapshot with an intraday one".to_string(),
				));
			}
		}

		connection.execute(
			"DELETE FROM portfolio_positions WHERE fund = ?1 AND snapshot_date = ?2",
			params![self.fund, calendar_date],
		)?;
		let now = Self::timestamp_to_text(Utc::now());
		let timestamp_text = Self::timestamp_to_text(snapshot.timestamp);
		for position in &snapshot.positions {
			connection.execute(
				"INSERT INTO portfolio_positions
				 (fund, ticker, snapshot_date, timestamp, shares, avg_price, cost_basis, currency, company, current_price, market_value, unrealized_pnl, stop_loss, created_at)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
				params![
					self.fund,
					position.ticker,
					calendar_date,
					timestamp_text,
					Self::decimal_to_text(round_shares(position.shares)),
					Self::decimal_to_text(round_money(position.avg_price)),
					Self::decimal_to_text(round_money(position.cost_basis)),
					position.currency,
					position.company,
					position.current_price.map(round_money).map(Self::decimal_to_text),
					position.market_value.map(round_money).map(Self::decimal_to_text),
					position.unrealized_pnl.map(round_money).map(Self::decimal_to_text),
					position.stop_loss.map(round_money).map(Self::decimal_to_text),
					now,
				],
			)?;
		}
		Ok(())
	}

	async fn get_trade_history(&self, ticker: Option<&str>, date_range: Option<DateRange>) -> Result<Vec<Trade>, RepositoryError> {
		let connection = self.connection.lock().unwrap();
		let mut statement = connection.prepare(
			"SELECT trade_id, ticker, action, shares, price, timestamp, cost_basis, realized_pnl, reason, currency
			 FROM trade_log WHERE fund = ?1 ORDER BY timestamp ASC",
		)?;
		let rows = statement.query_map(params![self.fund], |row| {
			Ok((
				row.get::<_, String>(0)?,
				row.get::<_, String>(1)?,
				row.get::<_, String>(2)?,
				row.get::<_, String>(3)?,
				row.get::<_, String>(4)?,
				row.get::<_, String>(5)?,
				row.get::<_, String>(6)?,
				row.get::<_, Option<String>>(7)?,
				row.get::<_, String>(8)?,
				row.get::<_, String>(9)?,
			))
		})?;
		let mut trades = Vec::new();
		for row in rows {
			let (trade_id, row_ticker, action_text, shares, price, timestamp_text, cost_basis, realized_pnl, reason, currency) = row?;
			if let Some(ticker) = ticker {
				if row_ticker != ticker {
					continue;
				}
			}
			let timestamp = Self::text_to_timestamp(&timestamp_text)?;
			if let Some((start, end)) = date_range {
				if timestamp < start || timestamp > end {
					continue;
				}
			}
			let action = if action_text == "SELL" { Action::Sell } else { Action::Buy };
			trades.push(Trade {
				trade_id: Uuid::parse_str(&trade_id).map_err(|error| RepositoryError::Corruption(error.to_string()))?,
				ticker: row_ticker,
				action,
				shares: Self::text_to_decimal(&shares)?,
				price: Self::text_to_decimal(&price)?,
				timestamp,
				cost_basis: Self::text_to_decimal(&cost_basis)?,
				realized_pnl: realized_pnl.map(|v| Self::text_to_decimal(&v)).transpose()?,
				reason,
				currency,
				fund: self.fund.clone(),
			});
		}
		Ok(trades)
	}

	async fn save_trade(&self, trade: &Trade) -> Result<(), RepositoryError> {
		let connection = self.connection.lock().unwrap();
		connection.execute(
			"INSERT INTO trade_log (trade_id, fund, ticker, action, shares, price, timestamp, cost_basis, realized_pnl, reason, currency, created_at)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
			params![
				trade.trade_id.to_string(),
				self.fund,
				trade.ticker,
				trade.action.to_string(),
				Self::decimal_to_text(round_shares(trade.shares)),
				Self::decimal_to_text(round_money(trade.price)),
				Self::timestamp_to_text(trade.timestamp),
				Self::decimal_to_text(round_money(trade.cost_basis)),
				trade.realized_pnl.map(round_money).map(Self::decimal_to_text),
				trade.reason,
				trade.currency,
				Self::timestamp_to_text(Utc::now()),
			],
		)?;
		Ok(())
	}

	async fn get_positions_by_ticker(&self, ticker: &str) -> Result<Vec<Position>, RepositoryError> {
		let snapshots = self.get_portfolio_data(None).await?;
		Ok(snapshots.into_iter().filter_map(|snapshot| snapshot.position(ticker).cloned()).collect())
	}

	async fn get_market_data(&self, ticker: &str, date_range: Option<DateRange>) -> Result<Vec<MarketData>, RepositoryError> {
		let connection = self.connection.lock().unwrap();
		let mut statement = connection.prepare(
			"SELECT date, open, high, low, close, adj_close, volume FROM market_data WHERE ticker = ?1 ORDER BY date ASC",
		)?;
		let rows = statement.query_map(params![ticker], |row| {
			Ok((
				row.get::<_, String>(0)?,
				row.get::<_, String>(1)?,
				row.get::<_, String>(2)?,
				row.get::<_, String>(3)?,
				row.get::<_, String>(4)?,
				row.get::<_, String>(5)?,
				row.get::<_, i64>(6)?,
			))
		})?;
		let mut out = Vec::new();
		for row in rows {
			let (date_text, open, high, low, close, adj_close, volume) = row?;
			let date = chrono::NaiveDate::parse_from_str(&date_text, "%Y-%m-%d")
				.map_err(|error| RepositoryError::Corruption(format!("unparseable market data date {date_text:?}: {error}")))?;
			if let Some((start, end)) = date_range {
				let at = crate::calendar::eastern_time(date, 16, 0);
				if at < start || at > end {
					continue;
				}
			}
			out.push(MarketData {
				ticker: ticker.to_string(),
				date,
				open: Self::text_to_decimal(&open)?,
				high: Self::text_to_decimal(&high)?,
				low: Self::text_to_decimal(&low)?,
				close: Self::text_to_decimal(&close)?,
				adj_close: Self::text_to_decimal(&adj_close)?,
				volume,
				source: Source::Cache,
			});
		}
		Ok(out)
	}

	async fn save_market_data(&self, market_data: &MarketData) -> Result<(), RepositoryError> {
		let connection = self.connection.lock().unwrap();
		connection.execute(
			"INSERT INTO market_data (ticker, date, open, high, low, close, adj_close, volume, source)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
			 ON CONFLICT(ticker, date) DO UPDATE SET
			 open = excluded.open, high = excluded.high, low = excluded.low,
			 close = excluded.close, adj_close = excluded.adj_close, volume = excluded.volume, source = excluded.source",
			params![
				market_data.ticker,
				market_data.date.format("%Y-%m-%d").to_string(),
				Self::decimal_to_text(round_money(market_data.open)),
				Self::decimal_to_text(round_money(market_data.high)),
				Self::decimal_to_text(round_money(market_data.low)),
				Self::decimal_to_text(round_money(market_data.close)),
				Self::decimal_to_text(round_money(market_data.adj_close)),
				market_data.volume,
				market_data.source.to_string(),
			],
		)?;
		Ok(())
	}

	async fn backup_data(&self, backup_path: &Path) -> Result<(), RepositoryError> {
		let connection = self.connection.lock().unwrap();
		let mut backup_connection = Connection::open(backup_path)?;
		let backup = rusqlite::backup::Backup::new(&connection, &mut backup_connection)?;
		backup.run_to_completion(5, std::time::Duration::from_millis(50), None)?;
		Ok(())
	}

	async fn restore_from_backup(&self, backup_path: &Path) -> Result<(), RepositoryError> {
		let backup_connection = Connection::open(backup_path)?;
		let mut connection = self.connection.lock().unwrap();
		let backup = rusqlite::backup::Backup::new(&backup_connection, &mut connection)?;
		backup.run_to_completion(5, std::time::Duration::from_millis(50), None)?;
		Ok(())
	}

	async fn validate_data_integrity(&self) -> Result<Vec<String>, RepositoryError> {
		let mut issues = Vec::new();
		let snapshots = self.get_portfolio_data(None).await?;
		let mut seen_dates = std::collections::HashSet::new();
		for snapshot in &snapshots {
			let date = snapshot.calendar_date();
			if !seen_dates.insert(date) {
				issues.push(format!("duplicate snapshot for {date}"));
			}
			for position in &snapshot.positions {
				if position.shares < Decimal::ZERO {
					issues.push(format!("negative shares for {} on {date}", position.ticker));
				}
			}
		}
		Ok(issues)
	}

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

#[cfg(test)]
mod tests {
	use super::*;
	use rust_decimal_macros::dec;

	fn repo() -> RemoteDatabaseRepository {
		RemoteDatabaseRepository::open("main", ":memory:").unwrap()
	}

	#[tokio::test]
	async fn trade_round_trips_through_sqlite() {
		let repository = repo();
		let trade = Trade::new_buy("main", "AAPL", dec!(10), dec!(100), Utc::now(), "USD", "Dip buy").unwrap();
		repository.save_trade(&trade).await.unwrap();
		let trades = repository.get_trade_history(None, None).await.unwrap();
		assert_eq!(trades.len(), 1);
		assert_eq!(trades[0].ticker, "AAPL");
	}

	#[tokio::test]
	async fn snapshot_upsert_replaces_same_date_rows() {
		let repository = repo();
		let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let snapshot = PortfolioSnapshot::at_market_close("main", date, vec![Position::new("AAPL", dec!(10), dec!(100), "USD")]);
		repository.update_daily_portfolio_snapshot(&snapshot, false).await.unwrap();
		let updated = PortfolioSnapshot::at_market_close("main", date, vec![Position::new("AAPL", dec!(20), dec!(90), "USD")]);
		repository.update_daily_portfolio_snapshot(&updated, true).await.unwrap();
		let snapshots = repository.get_portfolio_data(None).await.unwrap();
		assert_eq!(snapshots.len(), 1);
		assert_eq!(snapshots[0].positions[0].shares, dec!(20));
	}

	#[tokio::test]
	async fn market_data_upsert_is_idempotent_per_ticker_and_date() {
		let repository = repo();
		let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let md = MarketData {
			ticker: "AAPL".to_string(),
			date,
			open: dec!(100),
			high: dec!(101),
			low: dec!(99),
			close: dec!(100.5),
			adj_close: dec!(100.5),
			volume: 1000,
			source: Source::Primary,
		};
		repository.save_market_data(&md).await.unwrap();
		repository.save_market_data(&md).await.unwrap();
		let rows = repository.get_market_data("AAPL", None).await.unwrap();
		assert_eq!(rows.len(), 1);
	}

	/// `daily_pnl` should reflect the change in `unrealized_pnl` since
	/// yesterday's snapshot, not collapse to today's total unrealized P&L.
	#[tokio::test]
	async fn daily_pnl_is_joined_from_the_prior_days_snapshot_not_todays_cost_basis() {
		let repository = repo();
		let yesterday = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
		let today = chrono::NaiveDate::from_ymd_opt(2026, 1, 6).unwrap();

		let position_yesterday = Position::new("AAPL", dec!(100), dec!(10.00), "USD").with_price(dec!(10.50));
		repository
			.update_daily_portfolio_snapshot(&PortfolioSnapshot::at_market_close("main", yesterday, vec![position_yesterday]), false)
			.await
			.unwrap();
		let position_today = Position::new("AAPL", dec!(100), dec!(10.00), "USD").with_price(dec!(11.20));
		repository
			.update_daily_portfolio_snapshot(&PortfolioSnapshot::at_market_close("main", today, vec![position_today]), false)
			.await
			.unwrap();

		let snapshot = repository.get_latest_portfolio_with_pnl().await.unwrap().unwrap();
		let position = snapshot.position("AAPL").unwrap();
		assert_eq!(position.daily_pnl, Some(dec!(70.00)));
		assert_ne!(position.daily_pnl, position.unrealized_pnl);
		assert_eq!(position.five_day_pnl, None);
	}
}
