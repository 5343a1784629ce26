//! Driver image references.
//!
//! An image reference names the installable artifact for one language driver
//! as `<transport>://<location>`:
//!
//! - `exec://python-driver` - executable looked up on the search path, then `PATH`
//! - `file:///opt/drivers/python` - executable at an absolute path

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where an image is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageTransport {
	/// Executable name resolved through search directories.
	#[default]
	Exec,
	/// Absolute path to an executable.
	File,
}

impl ImageTransport {
	pub fn as_str(&self) -> &'static str {
		match self {
			ImageTransport::Exec => "exec",
			ImageTransport::File => "file",
		}
	}
}

impl fmt::Display for ImageTransport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ImageTransport {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"exec" => Ok(ImageTransport::Exec),
			"file" => Ok(ImageTransport::File),
			other => Err(Error::UnsupportedTransport(other.to_string())),
		}
	}
}

/// Parsed `<transport>://<location>` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
	transport: ImageTransport,
	location: String,
}

impl ImageRef {
	pub fn new(transport: ImageTransport, location: impl Into<String>) -> Self {
		Self {
			transport,
			location: location.into(),
		}
	}

	/// Conventional reference for a language's driver: `<transport>://<language>-driver`.
	pub fn default_for(transport: ImageTransport, language: &str) -> Self {
		Self::new(transport, format!("{language}-driver"))
	}

	pub fn transport(&self) -> ImageTransport {
		self.transport
	}

	pub fn location(&self) -> &str {
		&self.location
	}
}

impl fmt::Display for ImageRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}://{}", self.transport, self.location)
	}
}

impl FromStr for ImageRef {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		let (transport, location) = s
			.split_once("://")
			.ok_or_else(|| Error::InvalidImageReference(s.to_string()))?;
		if location.is_empty() {
			return Err(Error::InvalidImageReference(s.to_string()));
		}
		let transport = transport.parse::<ImageTransport>()?;
		if transport == ImageTransport::File && !location.starts_with('/') {
			return Err(Error::InvalidImageReference(s.to_string()));
		}
		Ok(Self::new(transport, location))
	}
}

impl Serialize for ImageRef {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for ImageRef {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_exec_reference() {
		let image: ImageRef = "exec://python-driver".parse().unwrap();
		assert_eq!(image.transport(), ImageTransport::Exec);
		assert_eq!(image.location(), "python-driver");
		assert_eq!(image.to_string(), "exec://python-driver");
	}

	#[test]
	fn parses_file_reference() {
		let image: ImageRef = "file:///opt/drivers/go".parse().unwrap();
		assert_eq!(image.transport(), ImageTransport::File);
		assert_eq!(image.location(), "/opt/drivers/go");
	}

	#[test]
	fn file_reference_must_be_absolute() {
		let err = "file://drivers/go".parse::<ImageRef>().unwrap_err();
		assert!(matches!(err, Error::InvalidImageReference(_)));
	}

	#[test]
	fn rejects_missing_separator() {
		let err = "python-driver".parse::<ImageRef>().unwrap_err();
		assert!(matches!(err, Error::InvalidImageReference(_)));
	}

	#[test]
	fn rejects_unknown_transport() {
		let err = "docker://bblfsh/python-driver".parse::<ImageRef>().unwrap_err();
		assert!(matches!(err, Error::UnsupportedTransport(t) if t == "docker"));
	}

	#[test]
	fn default_reference_follows_naming_convention() {
		let image = ImageRef::default_for(ImageTransport::Exec, "go");
		assert_eq!(image.to_string(), "exec://go-driver");
	}

	#[test]
	fn serializes_as_string() {
		let image = ImageRef::default_for(ImageTransport::Exec, "ruby");
		let json = serde_json::to_string(&image).unwrap();
		assert_eq!(json, "\"exec://ruby-driver\"");
		let back: ImageRef = serde_json::from_str(&json).unwrap();
		assert_eq!(back, image);
	}
}
