use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Source tag for one fetched OHLCV row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
	Primary,
	SecondaryApi,
	SecondaryCsv,
	Proxy(String),
	Cache,
}

impl std::fmt::Display for Source {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Source::Primary => write!(f, "primary"),
			Source::SecondaryApi => write!(f, "secondary-api"),
			Source::SecondaryCsv => write!(f, "secondary-csv"),
			Source::Proxy(symbol) => write!(f, "proxy:{symbol}"),
			Source::Cache => write!(f, "cache"),
		}
	}
}

/// One OHLCV row for a ticker on a date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
	pub ticker: String,
	pub date: NaiveDate,
	pub open: Decimal,
	pub high: Decimal,
	pub low: Decimal,
	pub close: Decimal,
	pub adj_close: Decimal,
	pub volume: i64,
	pub source: Source,
}

/// A full OHLCV frame for one ticker, indexed by timezone-naive date.
pub type PriceFrame = std::collections::BTreeMap<NaiveDate, OhlcRow>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OhlcRow {
	pub open: Decimal,
	pub high: Decimal,
	pub low: Decimal,
	pub close: Decimal,
	pub adj_close: Decimal,
	pub volume: i64,
}

/// Merged vendor + overrides fundamentals record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalsRecord {
	pub ticker: String,
	pub sector: Option<String>,
	pub industry: Option<String>,
	pub country: Option<String>,
	pub market_cap: Option<Decimal>,
	pub trailing_pe: Option<Decimal>,
	pub dividend_yield: Option<Decimal>,
	pub fifty_two_week_high: Option<Decimal>,
	pub fifty_two_week_low: Option<Decimal>,
	pub description_note: Option<String>,
}
