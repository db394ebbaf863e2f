mod ini_file;
mod parser;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::ini_file::ImporterConfig;
use crate::parser::CsvTradeImporter;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let path = std::env::args().nth(1).unwrap_or_else(|| "config/portfolio-importer.ini".to_string());
	let config = ImporterConfig::load(&path).with_context(|| format!("failed to load configuration from \"{path}\""))?;
	let importer = CsvTradeImporter::new(config);
	let imported = importer.run().await?;
	println!("Imported {imported} trades");
	Ok(())
}
