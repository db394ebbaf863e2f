mod config;
mod server;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::load_configuration;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let path = std::env::args().nth(1).unwrap_or_else(|| "config/portfolio-server.ini".to_string());
	let configuration = load_configuration(&path).with_context(|| format!("failed to load configuration from \"{path}\""))?;
	server::run(configuration).await?;
	Ok(())
}
