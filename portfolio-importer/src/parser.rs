//! Reads a brokerage CSV export (the same `Date`/`Ticker`/`Shares Bought`/
//! `Buy Price`/`Cost Basis`/`PnL`/`Reason` header layout that
//! `repository::local` writes) and replays each row through `TradeProcessor`
//! in chronological order, so backdated rows rebuild history the same way a
//! live backdated trade would.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use portfolio_core::cache::PriceCache;
use portfolio_core::calendar::{trading_timezone, MarketCalendar};
use portfolio_core::fetcher::MarketDataFetcher;
use portfolio_core::model::{Action, BackendKind};
use portfolio_core::price_service::PriceService;
use portfolio_core::repository::{DualWriteRepository, LocalFileRepository, RemoteDatabaseRepository, Repository};
use portfolio_core::trade_processor::TradeProcessor;
use portfolio_core::{StooqCsvClient, YahooChartClient};

use crate::ini_file::ImporterConfig;

#[derive(Debug, Deserialize)]
struct ImportRow {
	#[serde(rename = "Date")]
	date: String,
	#[serde(rename = "Ticker")]
	ticker: String,
	#[serde(rename = "Shares Bought")]
	shares: Decimal,
	#[serde(rename = "Buy Price")]
	price: Decimal,
	#[serde(rename = "Reason")]
	reason: String,
}

pub struct CsvTradeImporter {
	config: ImporterConfig,
}

impl CsvTradeImporter {
	pub fn new(config: ImporterConfig) -> CsvTradeImporter {
		CsvTradeImporter { config }
	}

	pub async fn run(&self) -> Result<usize> {
		let repository = self.build_repository()?;
		let fetcher = MarketDataFetcher::new(
			Box::new(YahooChartClient::new()),
			Box::new(StooqCsvClient::new()),
			Box::new(StooqCsvClient::new()),
			HashMap::new(),
		);
		let price_service = PriceService::new(
			fetcher,
			PriceCache::new(Duration::from_secs(15 * 60), Duration::from_secs(12 * 3600), 512),
			MarketCalendar::new(),
		);
		let processor = TradeProcessor::new(repository.as_ref(), &price_service);

		let mut reader = csv::Reader::from_path(&self.config.csv_path)
			.with_context(|| format!("failed to open csv file \"{}\"", self.config.csv_path.display()))?;
		let mut rows: Vec<ImportRow> = reader.deserialize().collect::<std::result::Result<Vec<_>, _>>().with_context(|| "failed to parse csv rows")?;
		rows.sort_by_key(|row| row.date.clone());

		let mut imported = 0;
		for row in rows {
			let timestamp = match parse_row_timestamp(&row.date) {
				Ok(timestamp) => timestamp,
				Err(error) => {
					warn!(date = %row.date, %error, "skipping row with unparseable date");
					continue;
				}
			};
			let action = Action::infer_from_reason(&row.reason);
			let result = match action {
				Action::Buy => processor.execute_buy(&row.ticker, row.shares, row.price, timestamp, &self.config.default_currency, &row.reason, None).await.map(drop),
				Action::Sell => processor.execute_sell(&row.ticker, row.shares, row.price, timestamp, &self.config.default_currency, &row.reason, false).await.map(drop),
			};
			match result {
				Ok(()) => imported += 1,
				Err(error) => warn!(ticker = %row.ticker, %error, "skipping row that failed to replay"),
			}
		}
		info!(imported, fund = %self.config.fund, "csv import completed");
		Ok(imported)
	}

	fn build_repository(&self) -> Result<Box<dyn Repository>> {
		let repository: Box<dyn Repository> = match &self.config.backend {
			BackendKind::Local { directory } => Box::new(LocalFileRepository::new(self.config.fund.clone(), directory.clone())),
			BackendKind::Remote { sqlite_path } => Box::new(RemoteDatabaseRepository::open(self.config.fund.clone(), sqlite_path)?),
			BackendKind::DualWrite { directory, sqlite_path } => {
				let primary = Box::new(LocalFileRepository::new(self.config.fund.clone(), directory.clone()));
				let secondary = Box::new(RemoteDatabaseRepository::open(self.config.fund.clone(), sqlite_path)?);
				Box::new(DualWriteRepository::new(primary, secondary))
			}
		};
		Ok(repository)
	}
}

/// Accepts both the legacy `%m/%d/%Y %H:%M <offset>` export format and a
/// bare `%m/%d/%Y` date, defaulting the latter to market close.
fn parse_row_timestamp(text: &str) -> Result<DateTime<Utc>> {
	let naive_part = text.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
	if let Ok(naive) = NaiveDateTime::parse_from_str(&naive_part, "%m/%d/%Y %H:%M") {
		return trading_timezone()
			.from_local_datetime(&naive)
			.single()
			.map(|dt| dt.with_timezone(&Utc))
			.with_context(|| format!("ambiguous local time {text:?}"));
	}
	let date = chrono::NaiveDate::parse_from_str(text.trim(), "%m/%d/%Y").with_context(|| format!("unparseable date {text:?}"))?;
	Ok(portfolio_core::calendar::eastern_time(date, 16, 0))
}
