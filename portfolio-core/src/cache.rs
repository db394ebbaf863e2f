//! Process-wide market-data caches. Price frames and
//! fundamentals carry a TTL; the company-name and symbol-correction maps are
//! persistent and never expire on their own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{FundamentalsRecord, PriceFrame};

const DEFAULT_PRICE_FRAME_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_FUNDAMENTALS_TTL: Duration = Duration::from_secs(12 * 3600);
const DEFAULT_PRICE_FRAME_CAPACITY: usize = 512;

struct Entry<T> {
	value: Arc<T>,
	inserted_at: Instant,
	last_used: Instant,
}

impl<T> Entry<T> {
	fn fresh(value: T) -> Entry<T> {
		let now = Instant::now();
		Entry {
			value: Arc::new(value),
			inserted_at: now,
			last_used: now,
		}
	}
}

/// TTL + LRU cache of per-ticker price frames, keyed by ticker.
/// Capacity eviction removes the least-recently-used entry; this never
/// blocks a caller on eviction failure, it is a best-effort memory bound.
pub struct PriceCache {
	frames: DashMap<String, Entry<PriceFrame>>,
	frame_ttl: Duration,
	capacity: usize,
	fundamentals: DashMap<String, Entry<FundamentalsRecord>>,
	fundamentals_ttl: Duration,
	company_names: DashMap<String, String>,
	symbol_corrections: DashMap<String, String>,
}

impl Default for PriceCache {
	fn default() -> Self {
		PriceCache::new(DEFAULT_PRICE_FRAME_TTL, DEFAULT_FUNDAMENTALS_TTL, DEFAULT_PRICE_FRAME_CAPACITY)
	}
}

impl PriceCache {
	pub fn new(frame_ttl: Duration, fundamentals_ttl: Duration, capacity: usize) -> PriceCache {
		PriceCache {
			frames: DashMap::new(),
			frame_ttl,
			capacity,
			fundamentals: DashMap::new(),
			fundamentals_ttl,
			company_names: DashMap::new(),
			symbol_corrections: DashMap::new(),
		}
	}

	pub fn get_price_frame(&self, ticker: &str) -> Option<Arc<PriceFrame>> {
		let mut entry = self.frames.get_mut(ticker)?;
		if entry.inserted_at.elapsed() > self.frame_ttl {
			drop(entry);
			self.frames.remove(ticker);
			return None;
		}
		entry.last_used = Instant::now();
		Some(Arc::clone(&entry.value))
	}

	pub fn put_price_frame(&self, ticker: &str, frame: PriceFrame) {
		self.frames.insert(ticker.to_string(), Entry::fresh(frame));
		self.evict_if_over_capacity();
	}

	fn evict_if_over_capacity(&self) {
		if self.frames.len() <= self.capacity {
			return;
		}
		let lru_key = self
			.frames
			.iter()
			.min_by_key(|entry| entry.last_used)
			.map(|entry| entry.key().clone());
		if let Some(key) = lru_key {
			self.frames.remove(&key);
		}
	}

	pub fn get_fundamentals(&self, ticker: &str) -> Option<Arc<FundamentalsRecord>> {
		let entry = self.fundamentals.get(ticker)?;
		if entry.inserted_at.elapsed() > self.fundamentals_ttl {
			drop(entry);
			self.fundamentals.remove(ticker);
			return None;
		}
		Some(Arc::clone(&entry.value))
	}

	pub fn put_fundamentals(&self, ticker: &str, record: FundamentalsRecord) {
		self.fundamentals.insert(ticker.to_string(), Entry::fresh(record));
	}

	/// Drops both the price frame and fundamentals entries for a ticker,
	/// used after a trade changes its position so stale aggregates aren't
	/// served from the TTL window.
	pub fn invalidate_ticker(&self, ticker: &str) {
		self.frames.remove(ticker);
		self.fundamentals.remove(ticker);
	}

	pub fn company_name(&self, ticker: &str) -> Option<String> {
		self.company_names.get(ticker).map(|entry| entry.value().clone())
	}

	pub fn set_company_name(&self, ticker: &str, name: impl Into<String>) {
		self.company_names.insert(ticker.to_string(), name.into());
	}

	/// Vendor ticker after applying a known symbol correction (e.g. `BRK.B`
	/// -> `BRK-B`), or the input unchanged if no correction is registered.
	pub fn correct_symbol(&self, ticker: &str) -> String {
		self.symbol_corrections
			.get(ticker)
			.map(|entry| entry.value().clone())
			.unwrap_or_else(|| ticker.to_string())
	}

	pub fn set_symbol_correction(&self, ticker: &str, corrected: impl Into<String>) {
		self.symbol_corrections.insert(ticker.to_string(), corrected.into());
	}

	/// Persists the two maps that are meant to survive a restart. Price
	/// frames and fundamentals are intentionally excluded: they are TTL'd
	/// and cheap to refetch, so reloading stale data on startup is worse
	/// than an empty cache.
	pub fn save_persistent_maps(&self, path: &Path) -> anyhow::Result<()> {
		let snapshot = PersistentMaps {
			company_names: self.company_names.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
			symbol_corrections: self.symbol_corrections.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
		};
		let tmp_path = tmp_path_for(path);
		let json = serde_json::to_vec_pretty(&snapshot)?;
		std::fs::write(&tmp_path, json)?;
		std::fs::rename(&tmp_path, path)?;
		Ok(())
	}

	/// Loads the persistent maps, or starts empty if the file is missing or
	/// corrupt. A corrupt cache file is not a fatal condition: it is
	/// rebuilt organically as tickers are looked up again.
	pub fn load_persistent_maps(path: &Path) -> PriceCache {
		let cache = PriceCache::default();
		match std::fs::read(path) {
			Ok(bytes) => match serde_json::from_slice::<PersistentMaps>(&bytes) {
				Ok(maps) => {
					for (ticker, name) in maps.company_names {
						cache.set_company_name(&ticker, name);
					}
					for (ticker, corrected) in maps.symbol_corrections {
						cache.set_symbol_correction(&ticker, corrected);
					}
				}
				Err(error) => warn!(%error, path = %path.display(), "persistent cache file is corrupt, starting with an empty cache"),
			},
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
			Err(error) => warn!(%error, path = %path.display(), "failed to read persistent cache file, starting with an empty cache"),
		}
		cache
	}
}

fn tmp_path_for(path: &Path) -> PathBuf {
	let mut tmp = path.as_os_str().to_owned();
	tmp.push(".tmp");
	PathBuf::from(tmp)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistentMaps {
	company_names: HashMap<String, String>,
	symbol_corrections: HashMap<String, String>,
}
