use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use configparser::ini::Ini;
use portfolio_core::model::{BackendKind, FundConfig};

pub struct ServerConfiguration {
	pub address: SocketAddr,
	pub static_directory: PathBuf,
	pub funds: Vec<FundConfig>,
	pub fetcher: FetcherConfiguration,
}

pub struct FetcherConfiguration {
	pub price_frame_ttl: Duration,
	pub fundamentals_ttl: Duration,
	pub price_frame_capacity: usize,
	pub fundamentals_overrides_path: Option<PathBuf>,
	pub persistent_cache_path: Option<PathBuf>,
}

pub fn load_configuration(path: &str) -> Result<ServerConfiguration> {
	let mut ini = Ini::new();
	ini.load(path).map_err(|error| anyhow!(error)).with_context(|| format!("failed to read configuration file \"{path}\""))?;

	let get_string = |section: &str, key: &str| -> Result<String> {
		ini.get(section, key).with_context(|| format!("missing key \"{key}\" in section \"{section}\""))
	};
	let get_string_opt = |section: &str, key: &str| -> Option<String> { ini.get(section, key) };

	let address_string = get_string("server", "address")?;
	let address: SocketAddr = address_string.parse().with_context(|| "failed to parse server address")?;
	let static_directory = PathBuf::from(get_string_opt("server", "static_directory").unwrap_or_else(|| "web".to_string()));

	let fetcher = FetcherConfiguration {
		price_frame_ttl: Duration::from_secs(get_string_opt("fetcher", "price_frame_ttl_secs").and_then(|v| v.parse().ok()).unwrap_or(15 * 60)),
		fundamentals_ttl: Duration::from_secs(get_string_opt("fetcher", "fundamentals_ttl_secs").and_then(|v| v.parse().ok()).unwrap_or(12 * 3600)),
		price_frame_capacity: get_string_opt("fetcher", "price_frame_capacity").and_then(|v| v.parse().ok()).unwrap_or(512),
		fundamentals_overrides_path: get_string_opt("fetcher", "fundamentals_overrides_path").map(PathBuf::from),
		persistent_cache_path: get_string_opt("fetcher", "persistent_cache_path").map(PathBuf::from),
	};

	let funds = ini
		.sections()
		.into_iter()
		.filter_map(|section| section.strip_prefix("fund.").map(|id| (section.clone(), id.to_string())))
		.map(|(section, id)| load_fund(&ini, &section, &id))
		.collect::<Result<Vec<_>>>()?;
	if funds.is_empty() {
		return Err(anyhow!("configuration defines no [fund.*] sections"));
	}

	Ok(ServerConfiguration { address, static_directory, funds, fetcher })
}

fn load_fund(ini: &Ini, section: &str, id: &str) -> Result<FundConfig> {
	let get = |key: &str| -> Result<String> { ini.get(section, key).with_context(|| format!("missing key \"{key}\" in section \"{section}\"")) };
	let get_opt = |key: &str| -> Option<String> { ini.get(section, key) };

	let display_name = get_opt("display_name").unwrap_or_else(|| id.to_string());
	let description = get_opt("description").unwrap_or_default();
	let base_currency = get_opt("base_currency").unwrap_or_else(|| "USD".to_string());
	let backend_kind = get("backend")?;
	let backend = match backend_kind.as_str() {
		"local" => BackendKind::Local { directory: PathBuf::from(get("directory")?) },
		"remote" => BackendKind::Remote { sqlite_path: PathBuf::from(get("sqlite_path")?) },
		"dual_write" => BackendKind::DualWrite {
			directory: PathBuf::from(get("directory")?),
			sqlite_path: PathBuf::from(get("sqlite_path")?),
		},
		other => return Err(anyhow!("unknown backend kind \"{other}\" for fund \"{id}\"")),
	};

	Ok(FundConfig { id: id.to_string(), display_name, description, backend, base_currency })
}
