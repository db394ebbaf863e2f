pub mod fund;
pub mod lot;
pub mod market_data;
pub mod portfolio;
pub mod trade;

pub use fund::{BackendKind, FundConfig};
pub use lot::{Lot, LotTracker, SaleSlice};
pub use market_data::{FundamentalsRecord, MarketData, OhlcRow, PriceFrame, Source};
pub use portfolio::{PortfolioSnapshot, Position};
pub use trade::{Action, Trade};
