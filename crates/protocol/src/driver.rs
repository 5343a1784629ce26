use serde::{Deserialize, Serialize};

/// Snapshot of a language's driver pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
	pub language: String,
	/// Image reference the pool was started from.
	pub image: String,
	/// Live workers (idle + busy).
	pub instances: usize,
	pub idle: usize,
	pub busy: usize,
}
