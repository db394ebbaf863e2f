//! Multi-stage market-data fallback ladder. Primary vendor ->
//! secondary vendor library -> secondary CSV endpoint -> proxy symbol on the
//! primary vendor. Each stage is tried in order; the first non-empty frame
//! wins and is tagged with the `Source` that produced it.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::model::{FundamentalsRecord, PriceFrame, Source};

const PER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PER_TICKER_BUDGET: Duration = Duration::from_secs(30);
const MAX_RETRIES_PER_STAGE: u32 = 1;

lazy_static! {
	/// Index proxy fallbacks: symbols the primary vendor serves under
	/// an ETF ticker when the index symbol itself is unavailable.
	static ref PROXY_MAP: HashMap<&'static str, &'static str> = {
		let mut map = HashMap::new();
		map.insert("^GSPC", "SPY");
		map.insert("^RUT", "IWM");
		map.insert("^IXIC", "QQQ");
		map.insert("^DJI", "DIA");
		map
	};

	/// Symbols the secondary vendor is known not to carry; skip stages 2/3
	/// for them rather than waiting out a guaranteed failure.
	static ref SECONDARY_BLOCKLIST: HashSet<&'static str> = {
		let mut set = HashSet::new();
		set.insert("^RUT");
		set
	};
}

/// Abstracts one vendor endpoint so the ladder can be tested without
/// network access.
#[async_trait]
pub trait VendorClient: Send + Sync {
	async fn fetch_price_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceFrame, FetchError>;
	async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsRecord, FetchError>;
}

pub struct MarketDataFetcher {
	primary: Box<dyn VendorClient>,
	secondary_api: Box<dyn VendorClient>,
	secondary_csv: Box<dyn VendorClient>,
	fundamentals_overrides: HashMap<String, FundamentalsRecord>,
}

impl MarketDataFetcher {
	pub fn new(
		primary: Box<dyn VendorClient>,
		secondary_api: Box<dyn VendorClient>,
		secondary_csv: Box<dyn VendorClient>,
		fundamentals_overrides: HashMap<String, FundamentalsRecord>,
	) -> MarketDataFetcher {
		MarketDataFetcher {
			primary,
			secondary_api,
			secondary_csv,
			fundamentals_overrides,
		}
	}

	/// Runs the full fallback ladder for one ticker, bounded by
	/// `PER_TICKER_BUDGET` overall. Returns the first stage's frame
	/// together with the `Source` tag identifying which stage produced it.
	pub async fn fetch_price_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<(PriceFrame, Source), FetchError> {
		let budget = tokio::time::timeout(PER_TICKER_BUDGET, self.run_ladder(ticker, start, end));
		match budget.await {
			Ok(result) => result,
			Err(_) => Err(FetchError::Timeout { ticker: ticker.to_string() }),
		}
	}

	async fn run_ladder(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<(PriceFrame, Source), FetchError> {
		if let Some(frame) = self.try_stage(self.primary.as_ref(), ticker, start, end).await {
			return Ok((frame, Source::Primary));
		}

		if !SECONDARY_BLOCKLIST.contains(ticker) {
			if let Some(frame) = self.try_stage(self.secondary_api.as_ref(), ticker, start, end).await {
				return Ok((frame, Source::SecondaryApi));
			}
			if let Some(frame) = self.try_stage(self.secondary_csv.as_ref(), ticker, start, end).await {
				return Ok((frame, Source::SecondaryCsv));
			}
		}

		if let Some(&proxy) = PROXY_MAP.get(ticker) {
			if let Some(frame) = self.try_stage(self.primary.as_ref(), proxy, start, end).await {
				return Ok((frame, Source::Proxy(proxy.to_string())));
			}
		}

		Err(FetchError::AllStagesFailed {
			ticker: ticker.to_string(),
			message: "primary, secondary-api, secondary-csv and proxy stages all failed".to_string(),
		})
	}

	async fn try_stage(&self, client: &dyn VendorClient, ticker: &str, start: NaiveDate, end: NaiveDate) -> Option<PriceFrame> {
		for attempt in 0..=MAX_RETRIES_PER_STAGE {
			let call = tokio::time::timeout(PER_REQUEST_TIMEOUT, client.fetch_price_history(ticker, start, end));
			match call.await {
				Ok(Ok(frame)) if !frame.is_empty() => return Some(frame),
				Ok(Ok(_)) => {
					debug!(ticker, attempt, "vendor stage returned an empty frame");
					return None;
				}
				Ok(Err(error)) => warn!(ticker, attempt, %error, "vendor stage failed"),
				Err(_) => warn!(ticker, attempt, "vendor stage timed out"),
			}
		}
		None
	}

	/// Fetches fundamentals from the primary vendor and merges in any
	/// registered override fields, which take precedence over vendor data
	/// (correcting known-bad API values). A 52-week high/low the vendor
	/// omits is derived from a year of the vendor's own price history rather
	/// than left blank.
	pub async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsRecord, FetchError> {
		let ticker_key = ticker.to_uppercase();
		let mut base = self.primary.fetch_fundamentals(&ticker_key).await?;
		if base.fifty_two_week_high.is_none() || base.fifty_two_week_low.is_none() {
			self.fill_fifty_two_week_range(&ticker_key, &mut base).await;
		}
		Ok(self.apply_overrides(&ticker_key, base))
	}

	async fn fill_fifty_two_week_range(&self, ticker: &str, record: &mut FundamentalsRecord) {
		let end = chrono::Utc::now().date_naive();
		let start = end - chrono::Duration::days(365);
		match self.primary.fetch_price_history(ticker, start, end).await {
			Ok(frame) if !frame.is_empty() => {
				let (high, low) = fifty_two_week_range(&frame);
				record.fifty_two_week_high = record.fifty_two_week_high.or(high);
				record.fifty_two_week_low = record.fifty_two_week_low.or(low);
			}
			Ok(_) => {}
			Err(error) => debug!(ticker, %error, "failed to derive 52-week range from price history"),
		}
	}

	fn apply_overrides(&self, ticker_key: &str, mut record: FundamentalsRecord) -> FundamentalsRecord {
		if let Some(overrides) = self.fundamentals_overrides.get(ticker_key) {
			if overrides.sector.is_some() {
				record.sector = overrides.sector.clone();
			}
			if overrides.industry.is_some() {
				record.industry = overrides.industry.clone();
			}
			if overrides.country.is_some() {
				record.country = overrides.country.clone();
			}
			if overrides.market_cap.is_some() {
				record.market_cap = overrides.market_cap;
			}
			if overrides.trailing_pe.is_some() {
				record.trailing_pe = overrides.trailing_pe;
			}
			if overrides.dividend_yield.is_some() {
				record.dividend_yield = overrides.dividend_yield;
			}
			if overrides.fifty_two_week_high.is_some() {
				record.fifty_two_week_high = overrides.fifty_two_week_high;
			}
			if overrides.fifty_two_week_low.is_some() {
				record.fifty_two_week_low = overrides.fifty_two_week_low;
			}
			if overrides.description_note.is_some() {
				record.description_note = overrides.description_note.clone();
			}
		}
		record
	}
}

/// Highest `high` and lowest `low` across a price frame, used to fill in a
/// 52-week range the vendor's own fundamentals endpoint omitted.
fn fifty_two_week_range(frame: &PriceFrame) -> (Option<Decimal>, Option<Decimal>) {
	let high = frame.values().map(|row| row.high).max();
	let low = frame.values().map(|row| row.low).min();
	(high, low)
}
