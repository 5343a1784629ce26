//! Server configuration file.
//!
//! Looked up in order: `--config <file>`, `$POLYPARSE_CONFIG`, then
//! `<config_dir>/polyparse/config.json`. Every field has a default, and a
//! missing default-location file means "all defaults".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use polyparse::{PoolConfig, ScalingPolicy, UtilizationPolicy};
use polyparse_runtime::ImageTransport;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

pub const CONFIG_ENV: &str = "POLYPARSE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
	/// Transport used for default image references.
	pub transport: ImageTransport,
	/// Directories searched for `exec://` drivers before `PATH`.
	pub search_paths: Vec<PathBuf>,
	/// Drivers installed at startup, language to image reference.
	pub drivers: BTreeMap<String, String>,
	pub policy: PolicyConfig,
	pub pool: PoolTimeouts,
	/// Unix socket the daemon listens on.
	pub socket: Option<PathBuf>,
	/// TCP address the daemon listens on instead of a socket.
	pub listen: Option<String>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			transport: ImageTransport::Exec,
			search_paths: Vec::new(),
			drivers: BTreeMap::new(),
			policy: PolicyConfig::default(),
			pool: PoolTimeouts::default(),
			socket: None,
			listen: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
	pub min_instances: usize,
	/// Defaults to the number of available CPUs.
	pub max_instances: Option<usize>,
	pub target_utilization: f64,
	pub cooldown_ms: u64,
}

impl Default for PolicyConfig {
	fn default() -> Self {
		Self {
			min_instances: 1,
			max_instances: None,
			target_utilization: 1.0,
			cooldown_ms: 1_000,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolTimeouts {
	pub acquire_timeout_ms: u64,
	pub idle_timeout_ms: u64,
	pub eviction_interval_ms: u64,
	pub parse_timeout_ms: u64,
	pub close_timeout_ms: u64,
}

impl Default for PoolTimeouts {
	fn default() -> Self {
		let pool = PoolConfig::default();
		Self {
			acquire_timeout_ms: millis(pool.acquire_timeout),
			idle_timeout_ms: millis(pool.idle_timeout),
			eviction_interval_ms: millis(pool.eviction_interval),
			parse_timeout_ms: millis(pool.parse_timeout),
			close_timeout_ms: millis(pool.close_timeout),
		}
	}
}

impl ServerConfig {
	/// Loads the configuration, honoring an explicit path first.
	///
	/// An explicit or `$POLYPARSE_CONFIG` path must exist; the per-user
	/// default may be absent.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		if let Some(path) = explicit {
			return Self::from_file(path);
		}
		if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
			return Self::from_file(Path::new(&path));
		}
		match default_config_path() {
			Some(path) if path.exists() => Self::from_file(&path),
			_ => Ok(Self::default()),
		}
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let contents = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		let config: Self = serde_json::from_str(&contents).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		if self.socket.is_some() && self.listen.is_some() {
			return Err(CliError::Config("`socket` and `listen` are mutually exclusive".to_string()));
		}
		self.policy()?;
		let pool = self.pool_config();
		if pool.eviction_interval.is_zero() {
			return Err(CliError::Config("`pool.eviction_interval_ms` must be positive".to_string()));
		}
		Ok(())
	}

	pub fn policy(&self) -> Result<Arc<dyn ScalingPolicy>> {
		let defaults = UtilizationPolicy::default();
		let maximum = self
			.policy
			.max_instances
			.unwrap_or_else(|| defaults.maximum().max(self.policy.min_instances));
		let policy = UtilizationPolicy::new(
			self.policy.min_instances,
			maximum,
			self.policy.target_utilization,
			Duration::from_millis(self.policy.cooldown_ms),
		)?;
		Ok(Arc::new(policy))
	}

	pub fn pool_config(&self) -> PoolConfig {
		PoolConfig {
			acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
			idle_timeout: Duration::from_millis(self.pool.idle_timeout_ms),
			eviction_interval: Duration::from_millis(self.pool.eviction_interval_ms),
			parse_timeout: Duration::from_millis(self.pool.parse_timeout_ms),
			close_timeout: Duration::from_millis(self.pool.close_timeout_ms),
		}
	}
}

fn millis(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `<config_dir>/polyparse/config.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("polyparse").join("config.json"))
}
