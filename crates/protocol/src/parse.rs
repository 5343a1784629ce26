//! Parse request/response messages.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a parse call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
	/// The driver produced a tree without complaints.
	#[default]
	Ok,
	/// The driver produced a tree but reported recoverable problems.
	Error,
	/// No tree could be produced.
	Fatal,
}

/// How [`ParseRequest::content`] is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
	#[default]
	Utf8,
	Base64,
}

/// Content could not be decoded with the declared [`Encoding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl std::fmt::Display for DecodeError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "invalid content encoding: {}", self.0)
	}
}

impl std::error::Error for DecodeError {}

/// Request to parse one source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseRequest {
	/// File name, used for language detection when `language` is empty.
	#[serde(default)]
	pub filename: String,
	/// Explicit language id. Empty means "detect".
	#[serde(default)]
	pub language: String,
	/// Source text, encoded according to `encoding`.
	pub content: String,
	#[serde(default)]
	pub encoding: Encoding,
	/// Upper bound for the driver call, in milliseconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout_ms: Option<u64>,
}

impl ParseRequest {
	/// Creates a UTF-8 request with no language hint.
	pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
		Self {
			filename: filename.into(),
			content: content.into(),
			..Default::default()
		}
	}

	/// Sets the explicit language id.
	pub fn with_language(mut self, language: impl Into<String>) -> Self {
		self.language = language.into();
		self
	}

	/// Sets the driver call timeout.
	pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
		self.timeout_ms = Some(timeout_ms);
		self
	}

	/// Returns the raw content bytes, base64-decoding when needed.
	pub fn decoded_content(&self) -> Result<Vec<u8>, DecodeError> {
		match self.encoding {
			Encoding::Utf8 => Ok(self.content.as_bytes().to_vec()),
			Encoding::Base64 => STANDARD
				.decode(self.content.as_bytes())
				.map_err(|e| DecodeError(e.to_string())),
		}
	}
}

/// Result of a parse call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResponse {
	pub status: Status,
	/// Human-readable problems, empty on a clean parse.
	#[serde(default)]
	pub errors: Vec<String>,
	/// Syntax tree as produced by the driver.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ast: Option<Value>,
	/// Language the request was served as.
	#[serde(default)]
	pub language: String,
}

impl ParseResponse {
	pub fn ok(ast: Value) -> Self {
		Self {
			status: Status::Ok,
			ast: Some(ast),
			..Default::default()
		}
	}

	pub fn fatal<I, S>(errors: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			status: Status::Fatal,
			errors: errors.into_iter().map(Into::into).collect(),
			..Default::default()
		}
	}

	pub fn with_language(mut self, language: impl Into<String>) -> Self {
		self.language = language.into();
		self
	}

	pub fn is_fatal(&self) -> bool {
		self.status == Status::Fatal
	}
}
