use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Error, Result};
use axum::extract::{Json, State};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use portfolio_core::cache::PriceCache;
use portfolio_core::fetcher::MarketDataFetcher;
use portfolio_core::model::{BackendKind, FundConfig, FundamentalsRecord, PortfolioSnapshot, Trade};
use portfolio_core::price_service::PriceMode;
use portfolio_core::rebuilder::HistoricalRebuilder;
use portfolio_core::repository::{DualWriteRepository, LocalFileRepository, RemoteDatabaseRepository, Repository};
use portfolio_core::snapshot::{DuplicateMode, SnapshotManager};
use portfolio_core::trade_processor::TradeProcessor;
use portfolio_core::{PriceService, StooqCsvClient, YahooChartClient};

use crate::config::ServerConfiguration;

struct ServerState {
	funds: HashMap<String, Arc<dyn Repository>>,
	dual_write_funds: HashMap<String, Arc<DualWriteRepository>>,
	fund_configs: HashMap<String, FundConfig>,
	price_service: PriceService,
	static_directory: std::path::PathBuf,
}

#[derive(Serialize)]
struct Response<T> {
	result: Option<T>,
	error: Option<String>,
}

pub async fn run(configuration: ServerConfiguration) -> Result<()> {
	let price_cache = match &configuration.fetcher.persistent_cache_path {
		Some(path) if path.exists() => PriceCache::load_persistent_maps(path),
		_ => PriceCache::new(configuration.fetcher.price_frame_ttl, configuration.fetcher.fundamentals_ttl, configuration.fetcher.price_frame_capacity),
	};
	let fundamentals_overrides = load_fundamentals_overrides(configuration.fetcher.fundamentals_overrides_path.as_deref())?;
	let fetcher = MarketDataFetcher::new(
		Box::new(YahooChartClient::new()),
		Box::new(StooqCsvClient::new()),
		Box::new(StooqCsvClient::new()),
		fundamentals_overrides,
	);
	let price_service = PriceService::new(fetcher, price_cache, portfolio_core::calendar::MarketCalendar::new());

	let mut funds: HashMap<String, Arc<dyn Repository>> = HashMap::new();
	let mut dual_write_funds: HashMap<String, Arc<DualWriteRepository>> = HashMap::new();
	let mut fund_configs: HashMap<String, FundConfig> = HashMap::new();
	for fund_config in configuration.funds {
		match &fund_config.backend {
			BackendKind::DualWrite { directory, sqlite_path } => {
				let primary = Box::new(LocalFileRepository::new(fund_config.id.clone(), directory.clone()));
				let secondary = Box::new(RemoteDatabaseRepository::open(fund_config.id.clone(), sqlite_path)?);
				let dual_write = Arc::new(DualWriteRepository::new(primary, secondary));
				funds.insert(fund_config.id.clone(), dual_write.clone());
				dual_write_funds.insert(fund_config.id.clone(), dual_write);
			}
			_ => {
				let repository = build_repository(&fund_config).with_context(|| format!("failed to open repository for fund \"{}\"", fund_config.id))?;
				funds.insert(fund_config.id.clone(), Arc::from(repository));
			}
		}
		fund_configs.insert(fund_config.id.clone(), fund_config);
	}

	info!(funds = funds.len(), address = %configuration.address, "starting portfolio server");
	let state = Arc::new(ServerState { funds, dual_write_funds, fund_configs, price_service, static_directory: configuration.static_directory.clone() });
	let serve_dir = ServeDir::new(&state.static_directory);
	let app = Router::new()
		.route("/portfolio", post(get_portfolio))
		.route("/history", post(get_history))
		.route("/trades", post(get_trades))
		.route("/buy", post(execute_buy))
		.route("/sell", post(execute_sell))
		.route("/rebuild", post(rebuild_history))
		.route("/reconcile", post(reconcile_fund))
		.route("/validate", post(validate_fund))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
		.fallback_service(serve_dir);

	let listener = TcpListener::bind(configuration.address).await.with_context(|| "failed to bind server address")?;
	axum::serve(listener, app).await.with_context(|| "axum server exited with an error")?;
	Ok(())
}

fn build_repository(fund_config: &FundConfig) -> Result<Box<dyn Repository>> {
	let repository: Box<dyn Repository> = match &fund_config.backend {
		BackendKind::Local { directory } => Box::new(LocalFileRepository::new(fund_config.id.clone(), directory.clone())),
		BackendKind::Remote { sqlite_path } => Box::new(RemoteDatabaseRepository::open(fund_config.id.clone(), sqlite_path)?),
		BackendKind::DualWrite { directory, sqlite_path } => {
			let primary = Box::new(LocalFileRepository::new(fund_config.id.clone(), directory.clone()));
			let secondary = Box::new(RemoteDatabaseRepository::open(fund_config.id.clone(), sqlite_path)?);
			Box::new(DualWriteRepository::new(primary, secondary))
		}
	};
	Ok(repository)
}

fn load_fundamentals_overrides(path: Option<&std::path::Path>) -> Result<HashMap<String, FundamentalsRecord>> {
	let Some(path) = path else {
		return Ok(HashMap::new());
	};
	if !path.exists() {
		return Ok(HashMap::new());
	}
	let bytes = std::fs::read(path).with_context(|| format!("failed to read fundamentals overrides file \"{}\"", path.display()))?;
	let overrides: HashMap<String, FundamentalsRecord> =
		serde_json::from_slice(&bytes).with_context(|| format!("failed to parse fundamentals overrides file \"{}\"", path.display()))?;
	Ok(overrides)
}

fn repository_for<'a>(state: &'a ServerState, fund: &str) -> Result<&'a Arc<dyn Repository>> {
	state.funds.get(fund).ok_or_else(|| anyhow!("unknown fund \"{fund}\""))
}

async fn respond<B, F>(future: F) -> impl IntoResponse
where
	B: Serialize,
	F: std::future::Future<Output = Result<B, Error>>,
{
	let response = match future.await {
		Ok(result) => Response { result: Some(result), error: None },
		Err(error) => Response { result: None, error: Some(format!("{error:#}")) },
	};
	Json(response)
}

#[derive(Deserialize)]
struct GetPortfolioRequest {
	fund: String,
	#[serde(default)]
	refresh_prices: bool,
}

async fn get_portfolio(State(state): State<Arc<ServerState>>, Json(request): Json<GetPortfolioRequest>) -> impl IntoResponse {
	respond(async move {
		let repository = repository_for(&state, &request.fund)?;
		let manager = SnapshotManager::new(repository.as_ref(), DuplicateMode::Lenient);
		let snapshots = manager.load(None).await?;
		let Some(mut latest) = snapshots.into_iter().max_by_key(|snapshot| snapshot.timestamp) else {
			return Ok(None);
		};
		if request.refresh_prices {
			latest.positions = state.price_service.update_positions_with_prices(latest.positions, PriceMode::Current).await;
		}
		if let Some(with_pnl) = repository.get_latest_portfolio_with_pnl().await? {
			for position in &mut latest.positions {
				if let Some(joined) = with_pnl.position(&position.ticker) {
					position.daily_pnl = joined.daily_pnl;
					position.five_day_pnl = joined.five_day_pnl;
				}
			}
		}
		Ok(Some(latest))
	})
	.await
}

#[derive(Deserialize)]
struct GetHistoryRequest {
	fund: String,
	from: NaiveDate,
	to: NaiveDate,
}

async fn get_history(State(state): State<Arc<ServerState>>, Json(request): Json<GetHistoryRequest>) -> impl IntoResponse {
	respond(async move {
		let repository = repository_for(&state, &request.fund)?;
		let range = (
			portfolio_core::calendar::eastern_time(request.from, 0, 0),
			portfolio_core::calendar::eastern_time(request.to, 23, 59),
		);
		let manager = SnapshotManager::new(repository.as_ref(), DuplicateMode::Lenient);
		let snapshots: Vec<PortfolioSnapshot> = manager.load(Some(range)).await?;
		Ok(snapshots)
	})
	.await
}

#[derive(Deserialize)]
struct GetTradesRequest {
	fund: String,
	ticker: Option<String>,
	from: Option<DateTime<Utc>>,
	to: Option<DateTime<Utc>>,
}

async fn get_trades(State(state): State<Arc<ServerState>>, Json(request): Json<GetTradesRequest>) -> impl IntoResponse {
	respond(async move {
		let repository = repository_for(&state, &request.fund)?;
		let range = match (request.from, request.to) {
			(Some(from), Some(to)) => Some((from, to)),
			_ => None,
		};
		let trades: Vec<Trade> = repository.get_trade_history(request.ticker.as_deref(), range).await?;
		Ok(trades)
	})
	.await
}

#[derive(Deserialize)]
struct BuyRequest {
	fund: String,
	ticker: String,
	shares: Decimal,
	price: Decimal,
	timestamp: DateTime<Utc>,
	currency: String,
	reason: String,
	stop_loss: Option<Decimal>,
}

async fn execute_buy(State(state): State<Arc<ServerState>>, Json(request): Json<BuyRequest>) -> impl IntoResponse {
	respond(async move {
		let repository = repository_for(&state, &request.fund)?;
		let processor = TradeProcessor::new(repository.as_ref(), &state.price_service);
		let trade = processor
			.execute_buy(&request.ticker, request.shares, request.price, request.timestamp, &request.currency, &request.reason, request.stop_loss)
			.await?;
		Ok(trade)
	})
	.await
}

#[derive(Deserialize)]
struct SellRequest {
	fund: String,
	ticker: String,
	shares: Decimal,
	price: Decimal,
	timestamp: DateTime<Utc>,
	currency: String,
	reason: String,
	#[serde(default = "default_true")]
	validate_shares: bool,
}

fn default_true() -> bool {
	true
}

async fn execute_sell(State(state): State<Arc<ServerState>>, Json(request): Json<SellRequest>) -> impl IntoResponse {
	respond(async move {
		let repository = repository_for(&state, &request.fund)?;
		let processor = TradeProcessor::new(repository.as_ref(), &state.price_service);
		let trade = processor
			.execute_sell(&request.ticker, request.shares, request.price, request.timestamp, &request.currency, &request.reason, request.validate_shares)
			.await?;
		Ok(trade)
	})
	.await
}

#[derive(Deserialize)]
struct RebuildRequest {
	fund: String,
	from: NaiveDate,
}

async fn rebuild_history(State(state): State<Arc<ServerState>>, Json(request): Json<RebuildRequest>) -> impl IntoResponse {
	respond(async move {
		let repository = repository_for(&state, &request.fund)?;
		let rebuilder = HistoricalRebuilder::new(repository.as_ref(), &state.price_service);
		let rebuilt = rebuilder.rebuild_from(&request.fund, request.from).await?;
		Ok(rebuilt)
	})
	.await
}

#[derive(Deserialize)]
struct FundRequest {
	fund: String,
}

async fn reconcile_fund(State(state): State<Arc<ServerState>>, Json(request): Json<FundRequest>) -> impl IntoResponse {
	respond(async move {
		let dual_write = state
			.dual_write_funds
			.get(&request.fund)
			.ok_or_else(|| anyhow!("fund \"{}\" is not configured for dual-write, nothing to reconcile", request.fund))?;
		let issues = dual_write.reconcile().await?;
		Ok(issues)
	})
	.await
}

async fn validate_fund(State(state): State<Arc<ServerState>>, Json(request): Json<FundRequest>) -> impl IntoResponse {
	respond(async move {
		let repository = repository_for(&state, &request.fund)?;
		let issues = repository.validate_data_integrity().await?;
		Ok(issues)
	})
	.await
}
