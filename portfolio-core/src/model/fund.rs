use std::path::PathBuf;

/// Repository binding for a fund: backend type plus backend-specific settings.
#[derive(Debug, Clone)]
pub enum BackendKind {
	Local { directory: PathBuf },
	Remote { sqlite_path: PathBuf },
	DualWrite { directory: PathBuf, sqlite_path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct FundConfig {
	pub id: String,
	pub display_name: String,
	pub description: String,
	pub backend: BackendKind,
	pub base_currency: String,
}
