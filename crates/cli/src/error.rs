use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to read config {path}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {path}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid config: {0}")]
	Config(String),

	#[error("daemon is not running (socket: {0})")]
	DaemonNotRunning(String),

	#[error("daemon error {code}: {message}")]
	Daemon { code: String, message: String },

	#[error("parse failed: {0}")]
	ParseFailed(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Dispatch(#[from] polyparse::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	/// Process exit code for this error.
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::ConfigRead { .. } | CliError::ConfigParse { .. } | CliError::Config(_) => 78,
			CliError::DaemonNotRunning(_) => 69,
			_ => 1,
		}
	}
}
