//! Error types for the polyparse runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while installing, launching, or talking to drivers.
#[derive(Debug, Error)]
pub enum Error {
	/// Image reference string could not be parsed.
	#[error("invalid image reference '{0}': expected <transport>://<location>")]
	InvalidImageReference(String),

	/// Image reference names a transport this runtime cannot fetch from.
	#[error("unsupported image transport: {0}")]
	UnsupportedTransport(String),

	/// Image could not be located on disk.
	#[error("image not found: {reference} ({reason})")]
	ImageNotFound { reference: String, reason: String },

	/// Launch was requested for an image that was never installed.
	#[error("image not installed: {0}")]
	NotInstalled(String),

	/// Failed to start the driver process.
	#[error("failed to launch driver: {0}")]
	LaunchFailed(String),

	/// Transport-level error (stdio communication).
	#[error("transport error: {0}")]
	Transport(String),

	/// Peer announced a frame larger than we accept.
	#[error("frame of {len} bytes exceeds limit of {max} bytes")]
	FrameTooLarge { len: usize, max: usize },

	/// Driver process went away mid-conversation.
	#[error("driver exited: {0}")]
	WorkerExited(String),

	/// Timeout waiting for the driver.
	#[error("timeout: {0}")]
	Timeout(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true if the image itself is at fault rather than a running worker.
	pub fn is_image_error(&self) -> bool {
		matches!(
			self,
			Error::InvalidImageReference(_)
				| Error::UnsupportedTransport(_)
				| Error::ImageNotFound { .. }
				| Error::NotInstalled(_)
		)
	}
}
