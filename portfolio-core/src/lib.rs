pub mod cache;
pub mod calendar;
pub mod decimal;
pub mod error;
pub mod fetcher;
pub mod lot_engine;
pub mod model;
pub mod price_service;
pub mod rebuilder;
pub mod repository;
pub mod snapshot;
pub mod trade_processor;
pub mod vendor;

pub use calendar::MarketCalendar;
pub use fetcher::{MarketDataFetcher, VendorClient};
pub use lot_engine::LotEngine;
pub use price_service::{FetchStats, PriceMode, PriceService};
pub use rebuilder::HistoricalRebuilder;
pub use repository::Repository;
pub use snapshot::{DuplicateMode, SnapshotManager};
pub use trade_processor::TradeProcessor;
pub use vendor::{StooqCsvClient, YahooChartClient};
