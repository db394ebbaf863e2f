//! Concrete `VendorClient` implementations backing the fallback ladder in
//! `fetcher`. `YahooChartClient` talks to Yahoo Finance's public chart and
//! quoteSummary endpoints and is used as both the primary vendor and the
//! proxy-symbol lookup. `StooqCsvClient` pulls the plain-CSV daily-bars
//! endpoint Stooq has served for years; it stands in for both secondary
//! stages, since there is no Rust equivalent of a pandas-datareader-backed
//! secondary API and going straight to Stooq's CSV output is what that
//! library did under the hood anyway.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::FetchError;
use crate::fetcher::VendorClient;
use crate::model::{FundamentalsRecord, OhlcRow, PriceFrame};

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const YAHOO_QUOTE_SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const STOOQ_URL: &str = "https://stooq.com/q/d/l";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub struct YahooChartClient {
	http: Client,
}

impl YahooChartClient {
	pub fn new() -> YahooChartClient {
		let http = Client::builder().user_agent(USER_AGENT).build().expect("reqwest client with a static config never fails to build");
		YahooChartClient { http }
	}
}

impl Default for YahooChartClient {
	fn default() -> Self {
		YahooChartClient::new()
	}
}

#[async_trait]
impl VendorClient for YahooChartClient {
	async fn fetch_price_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceFrame, FetchError> {
		let period1 = start.and_hms_opt(0, 0, 0).expect("midnight is a valid time").and_utc().timestamp();
		let period2 = end
			.succ_opt()
			.unwrap_or(end)
			.and_hms_opt(0, 0, 0)
			.expect("midnight is a valid time")
			.and_utc()
			.timestamp();
		let url = format!("{YAHOO_CHART_URL}/{ticker}");
		let response = self
			.http
			.get(&url)
			.query(&[("period1", period1.to_string()), ("period2", period2.to_string()), ("interval", "1d".to_string())])
			.send()
			.await?
			.error_for_status()?;
		let body: ChartResponse = response.json().await?;
		chart_response_to_frame(body)
	}

	async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsRecord, FetchError> {
		let url = format!("{YAHOO_QUOTE_SUMMARY_URL}/{ticker}");
		let response = self
			.http
			.get(&url)
			.query(&[("modules", "assetProfile,summaryDetail,defaultKeyStatistics")])
			.send()
			.await?
			.error_for_status()?;
		let body: QuoteSummaryResponse = response.json().await?;
		quote_summary_to_record(ticker, body)
	}
}

pub struct StooqCsvClient {
	http: Client,
}

impl StooqCsvClient {
	pub fn new() -> StooqCsvClient {
		let http = Client::builder().user_agent(USER_AGENT).build().expect("reqwest client with a static config never fails to build");
		StooqCsvClient { http }
	}
}

impl Default for StooqCsvClient {
	fn default() -> Self {
		StooqCsvClient::new()
	}
}

#[async_trait]
impl VendorClient for StooqCsvClient {
	async fn fetch_price_history(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<PriceFrame, FetchError> {
		let symbol = stooq_symbol(ticker);
		let body = self
			.http
			.get(STOOQ_URL)
			.query(&[
				("s", symbol.as_str()),
				("d1", &start.format("%Y%m%d").to_string()),
				("d2", &end.format("%Y%m%d").to_string()),
				("i", "d"),
			])
			.send()
			.await?
			.error_for_status()?
			.text()
			.await?;
		parse_stooq_csv(&body)
	}

	/// Stooq's CSV endpoint carries no fundamentals; this stage is never
	/// reached through `MarketDataFetcher::fetch_fundamentals`, which only
	/// consults the primary vendor.
	async fn fetch_fundamentals(&self, ticker: &str) -> Result<FundamentalsRecord, FetchError> {
		Err(FetchError::Parse(format!("stooq does not provide fundamentals for {ticker}")))
	}
}

/// Stooq tickers carry a market suffix; US equities default to `.us`,
/// indices keep their caret prefix without one, and a ticker that already
/// carries a market suffix (`SHOP.TO`, `RY.V`) keeps it as-is rather than
/// having `.us` appended on top.
fn stooq_symbol(ticker: &str) -> String {
	let lower = ticker.to_lowercase();
	if ticker.starts_with('^') {
		lower
	} else if lower.contains('.') {
		lower
	} else {
		format!("{lower}.us")
	}
}

fn parse_stooq_csv(body: &str) -> Result<PriceFrame, FetchError> {
	let mut frame = PriceFrame::new();
	let mut lines = body.lines();
	let header = lines.next().ok_or_else(|| FetchError::Parse("empty stooq response".to_string()))?;
	if header.trim().eq_ignore_ascii_case("no data") || !header.starts_with("Date") {
		return Ok(frame);
	}
	for line in lines {
		if line.trim().is_empty() {
			continue;
		}
		let fields: Vec<&str> = line.split(',').collect();
		if fields.len() < 6 {
			continue;
		}
		let date = NaiveDate::parse_from_str(fields[0], "%Y-%m-%d").map_err(|error| FetchError::Parse(error.to_string()))?;
		let open = parse_decimal(fields[1])?;
		let high = parse_decimal(fields[2])?;
		let low = parse_decimal(fields[3])?;
		let close = parse_decimal(fields[4])?;
		let volume = fields[5].trim().parse::<i64>().unwrap_or(0);
		frame.insert(date, OhlcRow { open, high, low, close, adj_close: close, volume });
	}
	Ok(frame)
}

fn parse_decimal(field: &str) -> Result<Decimal, FetchError> {
	Decimal::from_str(field.trim()).map_err(|error| FetchError::Parse(error.to_string()))
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
	chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
	result: Option<Vec<ChartResult>>,
	error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
	description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
	timestamp: Option<Vec<i64>>,
	indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
	quote: Vec<ChartQuote>,
	adjclose: Option<Vec<ChartAdjClose>>,
}

#[derive(Debug, Deserialize, Default)]
struct ChartQuote {
	open: Vec<Option<f64>>,
	high: Vec<Option<f64>>,
	low: Vec<Option<f64>>,
	close: Vec<Option<f64>>,
	volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct ChartAdjClose {
	adjclose: Vec<Option<f64>>,
}

fn chart_response_to_frame(body: ChartResponse) -> Result<PriceFrame, FetchError> {
	if let Some(error) = body.chart.error {
		return Err(FetchError::Parse(error.description));
	}
	let Some(result) = body.chart.result.and_then(|mut results| if results.is_empty() { None } else { Some(results.remove(0)) }) else {
		return Ok(PriceFrame::new());
	};
	let Some(timestamps) = result.timestamp else {
		return Ok(PriceFrame::new());
	};
	let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
	let adjclose = result
		.indicators
		.adjclose
		.and_then(|mut rows| if rows.is_empty() { None } else { Some(rows.remove(0).adjclose) });

	let mut frame = PriceFrame::new();
	for (index, timestamp) in timestamps.into_iter().enumerate() {
		let (Some(open), Some(high), Some(low), Some(close)) = (
			quote.open.get(index).copied().flatten(),
			quote.high.get(index).copied().flatten(),
			quote.low.get(index).copied().flatten(),
			quote.close.get(index).copied().flatten(),
		) else {
			continue; // Yahoo pads non-trading days with nulls; skip them rather than fabricate a row.
		};
		let volume = quote.volume.get(index).copied().flatten().unwrap_or(0);
		let adj_close = adjclose.as_ref().and_then(|values| values.get(index).copied().flatten()).unwrap_or(close);
		let date = chrono::DateTime::from_timestamp(timestamp, 0)
			.ok_or_else(|| FetchError::Parse("invalid chart timestamp".to_string()))?
			.date_naive();
		frame.insert(
			date,
			OhlcRow {
				open: decimal_from_f64(open)?,
				high: decimal_from_f64(high)?,
				low: decimal_from_f64(low)?,
				close: decimal_from_f64(close)?,
				adj_close: decimal_from_f64(adj_close)?,
				volume,
			},
		);
	}
	Ok(frame)
}

fn decimal_from_f64(value: f64) -> Result<Decimal, FetchError> {
	Decimal::from_str(&format!("{value:.6}")).map_err(|error| FetchError::Parse(error.to_string()))
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryResponse {
	#[serde(rename = "quoteSummary")]
	quote_summary: QuoteSummaryBody,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryBody {
	result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Debug, Deserialize, Default)]
struct QuoteSummaryResult {
	#[serde(rename = "assetProfile")]
	asset_profile: Option<AssetProfile>,
	#[serde(rename = "summaryDetail")]
	summary_detail: Option<SummaryDetail>,
	#[serde(rename = "defaultKeyStatistics")]
	default_key_statistics: Option<DefaultKeyStatistics>,
}

#[derive(Debug, Deserialize, Default)]
struct AssetProfile {
	sector: Option<String>,
	industry: Option<String>,
	country: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SummaryDetail {
	#[serde(rename = "marketCap")]
	market_cap: Option<RawValue>,
	#[serde(rename = "trailingPE")]
	trailing_pe: Option<RawValue>,
	#[serde(rename = "dividendYield")]
	dividend_yield: Option<RawValue>,
	#[serde(rename = "dividendRate")]
	dividend_rate: Option<RawValue>,
	#[serde(rename = "previousClose")]
	previous_close: Option<RawValue>,
	#[serde(rename = "fiftyTwoWeekHigh")]
	fifty_two_week_high: Option<RawValue>,
	#[serde(rename = "fiftyTwoWeekLow")]
	fifty_two_week_low: Option<RawValue>,
}

/// Normalized country name aliases, keyed uppercase. Mirrors the
/// alias-table-plus-fallback shape used for currency inference in the
/// `yfinance-rs` pack entry's `core/currency.rs`.
const COUNTRY_ALIASES: &[(&str, &str)] = &[
	("UNITED STATES", "United States"),
	("UNITED STATES OF AMERICA", "United States"),
	("US", "United States"),
	("USA", "United States"),
	("CANADA", "Canada"),
	("UNITED KINGDOM", "United Kingdom"),
	("UK", "United Kingdom"),
];

/// Ticker market-suffix -> country, used when the vendor omits a country
/// outright (companies listed only on a foreign exchange).
const SUFFIX_COUNTRIES: &[(&str, &str)] = &[(".TO", "Canada"), (".V", "Canada")];

fn normalize_country(raw: &str) -> String {
	let upper = raw.trim().to_uppercase();
	COUNTRY_ALIASES.iter().find(|(key, _)| *key == upper).map(|(_, value)| value.to_string()).unwrap_or_else(|| raw.trim().to_string())
}

fn infer_country_from_suffix(ticker: &str) -> Option<String> {
	let upper = ticker.to_uppercase();
	SUFFIX_COUNTRIES.iter().find(|(suffix, _)| upper.ends_with(suffix)).map(|(_, country)| country.to_string())
}

/// Resolves the fundamentals country: normalize whatever the vendor sent,
/// falling back to suffix inference when the vendor sent nothing at all.
fn resolve_country(ticker: &str, vendor_country: Option<String>) -> Option<String> {
	match vendor_country {
		Some(country) if !country.trim().is_empty() => Some(normalize_country(&country)),
		_ => infer_country_from_suffix(ticker),
	}
}

/// Dividend yield as trailing annual dividend rate over previous close,
/// used only when the vendor's own `dividendYield` field is absent.
fn derive_dividend_yield(detail: &SummaryDetail) -> Option<Decimal> {
	let rate = detail.dividend_rate.as_ref()?.raw;
	let previous_close = detail.previous_close.as_ref()?.raw;
	if previous_close == 0.0 {
		return None;
	}
	decimal_from_f64(rate / previous_close).ok()
}

#[derive(Debug, Deserialize, Default)]
struct DefaultKeyStatistics {
	#[serde(rename = "trailingEps")]
	#[allow(dead_code)]
	trailing_eps: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
struct RawValue {
	raw: f64,
}

fn quote_summary_to_record(ticker: &str, body: QuoteSummaryResponse) -> Result<FundamentalsRecord, FetchError> {
	let Some(result) = body
		.quote_summary
		.result
		.and_then(|mut results| if results.is_empty() { None } else { Some(results.remove(0)) })
	else {
		return Ok(FundamentalsRecord { ticker: ticker.to_string(), country: resolve_country(ticker, None), ..Default::default() });
	};
	let profile = result.asset_profile.unwrap_or_default();
	let detail = result.summary_detail.unwrap_or_default();
	let dividend_yield = detail.dividend_yield.as_ref().and_then(|value| decimal_from_f64(value.raw).ok()).or_else(|| derive_dividend_yield(&detail));
	Ok(FundamentalsRecord {
		ticker: ticker.to_string(),
		sector: profile.sector,
		industry: profile.industry,
		country: resolve_country(ticker, profile.country),
		market_cap: detail.market_cap.and_then(|value| decimal_from_f64(value.raw).ok()),
		trailing_pe: detail.trailing_pe.and_then(|value| decimal_from_f64(value.raw).ok()),
		dividend_yield,
		fifty_two_week_high: detail.fifty_two_week_high.and_then(|value| decimal_from_f64(value.raw).ok()),
		fifty_two_week_low: detail.fifty_two_week_low.and_then(|value| decimal_from_f64(value.raw).ok()),
		description_note: None,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stooq_symbol_appends_us_suffix_for_equities_but_not_indices() {
		assert_eq!(stooq_symbol("AAPL"), "aapl.us");
		assert_eq!(stooq_symbol("^GSPC"), "^gspc");
	}

	#[test]
	fn stooq_symbol_retains_an_existing_market_suffix() {
		assert_eq!(stooq_symbol("SHOP.TO"), "shop.to");
		assert_eq!(stooq_symbol("RY.V"), "ry.v");
	}

	#[test]
	fn resolve_country_infers_canada_from_ticker_suffix_when_vendor_omits_it() {
		assert_eq!(resolve_country("SHOP.TO", None), Some("Canada".to_string()));
		assert_eq!(resolve_country("AAPL", None), None);
	}

	#[test]
	fn resolve_country_normalizes_a_raw_vendor_alias() {
		assert_eq!(resolve_country("AAPL", Some("United States of America".to_string())), Some("United States".to_string()));
	}

	#[test]
	fn derive_dividend_yield_falls_back_to_rate_over_previous_close() {
		let detail = SummaryDetail {
			dividend_rate: Some(RawValue { raw: 1.0 }),
			previous_close: Some(RawValue { raw: 200.0 }),
			..Default::default()
		};
		assert_eq!(derive_dividend_yield(&detail), Some(Decimal::from_str("0.005000").unwrap()));
	}

	#[test]
	fn parse_stooq_csv_reads_ohlcv_rows() {
		let body = "Date,Open,High,Low,Close,Volume\n2026-01-02,100.0,101.5,99.0,100.5,123456\n";
		let frame = parse_stooq_csv(body).unwrap();
		let row = frame.get(&NaiveDate::from_ymd_opt(2026, 1, 2).unwrap()).unwrap();
		assert_eq!(row.close, Decimal::from_str("100.5").unwrap());
		assert_eq!(row.volume, 123456);
	}

	#[test]
	fn parse_stooq_csv_treats_no_data_response_as_an_empty_frame() {
		let frame = parse_stooq_csv("No data\n").unwrap();
		assert!(frame.is_empty());
	}

	#[test]
	fn chart_response_to_frame_skips_null_padded_rows() {
		let response = ChartResponse {
			chart: ChartBody {
				result: Some(vec![ChartResult {
					timestamp: Some(vec![1735819200, 1735905600]),
					indicators: ChartIndicators {
						quote: vec![ChartQuote {
							open: vec![Some(100.0), None],
							high: vec![Some(101.0), None],
							low: vec![Some(99.0), None],
							close: vec![Some(100.5), None],
							volume: vec![Some(1000), None],
						}],
						adjclose: Some(vec![ChartAdjClose { adjclose: vec![Some(100.5), None] }]),
					},
				}]),
				error: None,
			},
		};
		let frame = chart_response_to_frame(response).unwrap();
		assert_eq!(frame.len(), 1);
	}

	#[test]
	fn chart_response_with_error_body_is_reported_as_a_parse_error() {
		let response = ChartResponse {
			chart: ChartBody { result: None, error: Some(ChartError { description: "No data found, symbol may be delisted".to_string() }) },
		};
		let result = chart_response_to_frame(response);
		assert!(matches!(result, Err(FetchError::Parse(_))));
	}
}
