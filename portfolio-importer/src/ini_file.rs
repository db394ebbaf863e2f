use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use configparser::ini::Ini;
use portfolio_core::model::BackendKind;

/// `[import]` section of `portfolio-importer.ini`: where the brokerage CSV
/// export lives and which fund/backend it replays into.
pub struct ImporterConfig {
	pub fund: String,
	pub base_currency: String,
	pub backend: BackendKind,
	pub csv_path: PathBuf,
	pub default_currency: String,
}

impl ImporterConfig {
	pub fn load(path: &str) -> Result<ImporterConfig> {
		let mut ini = Ini::new();
		ini.load(path).map_err(|error| anyhow!(error)).with_context(|| format!("failed to read configuration file \"{path}\""))?;

		let section = "import";
		let get = |key: &str| -> Result<String> { ini.get(section, key).with_context(|| format!("missing key \"{key}\" in section \"{section}\"")) };
		let get_opt = |key: &str| -> Option<String> { ini.get(section, key) };

		let fund = get("fund")?;
		let base_currency = get_opt("base_currency").unwrap_or_else(|| "USD".to_string());
		let default_currency = get_opt("default_currency").unwrap_or_else(|| base_currency.clone());
		let csv_path = PathBuf::from(get("csv_path")?);

		let backend = match get("backend")?.as_str() {
			"local" => BackendKind::Local { directory: PathBuf::from(get("directory")?) },
			"remote" => BackendKind::Remote { sqlite_path: PathBuf::from(get("sqlite_path")?) },
			"dual_write" => BackendKind::DualWrite {
				directory: PathBuf::from(get("directory")?),
				sqlite_path: PathBuf::from(get("sqlite_path")?),
			},
			other => return Err(anyhow!("unknown backend kind \"{other}\"")),
		};

		Ok(ImporterConfig { fund, base_currency, backend, csv_path, default_currency })
	}
}
