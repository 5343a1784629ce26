//! Error taxonomy for pools and the registry.

use thiserror::Error;

/// Result type alias for dispatch-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// No pool could be found or created for the language.
	#[error("missing driver for language {language:?}: {source}")]
	MissingDriver {
		language: String,
		#[source]
		source: Box<Error>,
	},

	/// Explicit install for a language that already has a pool.
	#[error("driver already installed: {language} (image reference: {image})")]
	AlreadyInstalled { language: String, image: String },

	/// Removal requested for a language without a pool.
	#[error("no driver installed for language {language:?}")]
	NotInstalled { language: String },

	/// Image installation or worker launch/execution failed.
	#[error("runtime failure for {language} ({image}): {source}")]
	Runtime {
		language: String,
		image: String,
		#[source]
		source: polyparse_runtime::Error,
	},

	/// No worker became available before the acquisition deadline.
	#[error("timeout after {waited_ms}ms waiting for a {language} driver")]
	PoolTimeout { language: String, waited_ms: u64 },

	/// The pool (or the whole registry) has been closed.
	#[error("driver pool for {language:?} is closed")]
	ClosedPool { language: String },

	/// Neither the request nor the detector named a language.
	#[error("language could not be determined")]
	UnknownLanguage,

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),
}

impl Error {
	pub fn is_closed(&self) -> bool {
		match self {
			Error::ClosedPool { .. } => true,
			Error::MissingDriver { source, .. } => source.is_closed(),
			_ => false,
		}
	}

	pub fn is_timeout(&self) -> bool {
		match self {
			Error::PoolTimeout { .. } => true,
			Error::Runtime { source, .. } => source.is_timeout(),
			Error::MissingDriver { source, .. } => source.is_timeout(),
			_ => false,
		}
	}

	pub(crate) fn closed(language: &str) -> Self {
		Error::ClosedPool {
			language: language.to_string(),
		}
	}
}
