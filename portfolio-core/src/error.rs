use thiserror::Error;

/// Error taxonomy for repository-backed operations: validation, not-found,
/// corruption, then backend I/O.
#[derive(Debug, Error)]
pub enum RepositoryError {
	#[error("validation error: {0}")]
	Validation(String),
	#[error("not found: {0}")]
	NotFound(String),
	#[error("data corruption detected: {0}")]
	Corruption(String),
	#[error("backend I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("CSV error: {0}")]
	Csv(#[from] csv::Error),
	#[error("SQLite error: {0}")]
	Sqlite(#[from] rusqlite::Error),
}

impl RepositoryError {
	pub fn is_corruption(&self) -> bool {
		matches!(self, RepositoryError::Corruption(_))
	}
}

/// Errors raised by the FIFO lot engine.
#[derive(Debug, Error)]
pub enum LotEngineError {
	#[error("insufficient shares for {ticker}: requested {requested}, available {available}")]
	InsufficientShares {
		ticker: String,
		requested: rust_decimal::Decimal,
		available: rust_decimal::Decimal,
	},
	#[error("invalid trade: {0}")]
	InvalidTrade(String),
}

/// Errors raised while executing a trade.
#[derive(Debug, Error)]
pub enum TradeProcessorError {
	#[error("invalid trade parameters: {0}")]
	Validation(String),
	#[error("insufficient shares for {ticker}: requested {requested}, available {available}")]
	InsufficientShares {
		ticker: String,
		requested: rust_decimal::Decimal,
		available: rust_decimal::Decimal,
	},
	#[error(transparent)]
	Repository(#[from] RepositoryError),
	#[error(transparent)]
	LotEngine(#[from] LotEngineError),
}

/// Errors raised by the market-data fallback ladder.
#[derive(Debug, Error)]
pub enum FetchError {
	#[error("all fallback stages failed for {ticker}: {message}")]
	AllStagesFailed { ticker: String, message: String },
	#[error("fetch timed out for {ticker}")]
	Timeout { ticker: String },
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),
	#[error("failed to parse vendor response: {0}")]
	Parse(String),
	#[error("operation cancelled")]
	Cancelled,
}
