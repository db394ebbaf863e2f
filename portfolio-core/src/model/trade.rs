use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

use crate::error::LotEngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Action {
	#[strum(serialize = "BUY")]
	Buy,
	#[strum(serialize = "SELL")]
	Sell,
}

impl Action {
	/// Infer the action from free-text when the column is absent: a
	/// case-insensitive contains of "sell" -> Sell, else Buy.
	pub fn infer_from_reason(reason: &str) -> Action {
		let lower = reason.to_lowercase();
		if lower.contains("sell") {
			Action::Sell
		} else {
			Action::Buy
		}
	}
}

/// Immutable record of a transaction. Never mutated after creation;
/// deletion is an administrative operation outside this crate's scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
	pub trade_id: Uuid,
	pub ticker: String,
	pub action: Action,
	pub shares: Decimal,
	pub price: Decimal,
	pub timestamp: DateTime<Utc>,
	pub cost_basis: Decimal,
	pub realized_pnl: Option<Decimal>,
	pub reason: String,
	pub currency: String,
	pub fund: String,
}

impl Trade {
	pub fn new_buy(
		fund: impl Into<String>,
		ticker: impl Into<String>,
		shares: Decimal,
		price: Decimal,
		timestamp: DateTime<Utc>,
		currency: impl Into<String>,
		reason: impl Into<String>,
	) -> Result<Trade, LotEngineError> {
		let ticker = ticker.into().to_uppercase();
		Self::validate(shares, price)?;
		Ok(Trade {
			trade_id: Uuid::new_v4(),
			ticker,
			action: Action::Buy,
			shares,
			price,
			timestamp,
			cost_basis: shares * price,
			realized_pnl: None,
			reason: reason.into(),
			currency: currency.into(),
			fund: fund.into(),
		})
	}

	pub fn new_sell(
		fund: impl Into<String>,
		ticker: impl Into<String>,
		shares: Decimal,
		price: Decimal,
		timestamp: DateTime<Utc>,
		currency: impl Into<String>,
		reason: impl Into<String>,
		cost_basis_sold: Decimal,
		realized_pnl: Decimal,
	) -> Result<Trade, LotEngineError> {
		let ticker = ticker.into().to_uppercase();
		Self::validate(shares, price)?;
		Ok(Trade {
			trade_id: Uuid::new_v4(),
			ticker,
			action: Action::Sell,
			shares,
			price,
			timestamp,
			cost_basis: cost_basis_sold,
			realized_pnl: Some(realized_pnl),
			reason: reason.into(),
			currency: currency.into(),
			fund: fund.into(),
		})
	}

	fn validate(shares: Decimal, price: Decimal) -> Result<(), LotEngineError> {
		if shares <= Decimal::ZERO || price <= Decimal::ZERO {
			return Err(LotEngineError::InvalidTrade(
				"shares and price must both be positive".to_string(),
			));
		}
		Ok(())
	}

	pub fn is_buy(&self) -> bool {
		self.action == Action::Buy
	}

	pub fn is_sell(&self) -> bool {
		self.action == Action::Sell
	}
}
