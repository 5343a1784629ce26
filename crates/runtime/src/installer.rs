//! Driver image installation.
//!
//! Installing an image means locating the driver executable it names and
//! remembering where it lives so launches do not search again. Installation
//! state is kept in memory only.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::image::{ImageRef, ImageTransport};

/// Resolves and installs driver images.
#[async_trait]
pub trait ImageInstaller: Send + Sync {
	/// Image reference used for `language` when none was given explicitly.
	fn resolve(&self, transport: ImageTransport, language: &str) -> ImageRef {
		ImageRef::default_for(transport, language)
	}

	/// Installs `image`.
	///
	/// Installing an already-installed image is a no-op unless `force` is set.
	async fn install(&self, image: &ImageRef, force: bool) -> Result<()>;

	fn is_installed(&self, image: &ImageRef) -> bool;
}

/// An installed image and the executable it resolved to.
#[derive(Debug, Clone)]
pub struct InstalledImage {
	pub image: ImageRef,
	pub executable: PathBuf,
	pub installed_at: SystemTime,
}

/// Installs images from the local filesystem.
///
/// `exec://name` is looked up in each search path in order, then on `PATH`.
/// `file:///abs/path` must point at an executable file.
#[derive(Debug, Default)]
pub struct LocalInstaller {
	search_paths: Vec<PathBuf>,
	installed: DashMap<ImageRef, InstalledImage>,
}

impl LocalInstaller {
	pub fn new(search_paths: Vec<PathBuf>) -> Self {
		Self {
			search_paths,
			installed: DashMap::new(),
		}
	}

	/// Executable recorded for `image`, if installed.
	pub fn executable(&self, image: &ImageRef) -> Option<PathBuf> {
		self.installed.get(image).map(|entry| entry.executable.clone())
	}

	/// All installed images.
	pub fn installed(&self) -> Vec<InstalledImage> {
		self.installed.iter().map(|entry| entry.value().clone()).collect()
	}
}

#[async_trait]
impl ImageInstaller for LocalInstaller {
	async fn install(&self, image: &ImageRef, force: bool) -> Result<()> {
		if !force && self.installed.contains_key(image) {
			debug!(target = "polyparse.runtime", image = %image, "image already installed");
			return Ok(());
		}

		let search_paths = self.search_paths.clone();
		let lookup = image.clone();
		let executable = tokio::task::spawn_blocking(move || locate(&lookup, &search_paths))
			.await
			.map_err(|e| Error::LaunchFailed(format!("install task failed: {e}")))??;

		info!(
			target = "polyparse.runtime",
			image = %image,
			executable = %executable.display(),
			force,
			"driver image installed"
		);

		self.installed.insert(
			image.clone(),
			InstalledImage {
				image: image.clone(),
				executable,
				installed_at: SystemTime::now(),
			},
		);
		Ok(())
	}

	fn is_installed(&self, image: &ImageRef) -> bool {
		self.installed.contains_key(image)
	}
}

fn locate(image: &ImageRef, search_paths: &[PathBuf]) -> Result<PathBuf> {
	match image.transport() {
		ImageTransport::File => {
			let path = PathBuf::from(image.location());
			if is_executable(&path) {
				Ok(path)
			} else {
				Err(not_found(image, "no executable file at path"))
			}
		}
		ImageTransport::Exec => {
			for dir in search_paths {
				let candidate = dir.join(image.location());
				if is_executable(&candidate) {
					return Ok(candidate);
				}
			}
			which::which(image.location()).map_err(|e| not_found(image, &e.to_string()))
		}
	}
}

fn not_found(image: &ImageRef, reason: &str) -> Error {
	Error::ImageNotFound {
		reference: image.to_string(),
		reason: reason.to_string(),
	}
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
	use std::os::unix::fs::PermissionsExt;

	path.metadata()
		.map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
		.unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
	path.is_file()
}

#[cfg(test)]
mod tests {
	use std::fs;

	use tempfile::TempDir;

	use super::*;

	#[cfg(unix)]
	fn write_driver(dir: &Path, name: &str, mode: u32) -> PathBuf {
		use std::os::unix::fs::PermissionsExt;

		let path = dir.join(name);
		fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
		let mut perms = fs::metadata(&path).unwrap().permissions();
		perms.set_mode(mode);
		fs::set_permissions(&path, perms).unwrap();
		path
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn installs_from_search_path() {
		let temp = TempDir::new().unwrap();
		let driver = write_driver(temp.path(), "python-driver", 0o755);

		let installer = LocalInstaller::new(vec![temp.path().to_path_buf()]);
		let image = installer.resolve(ImageTransport::Exec, "python");
		installer.install(&image, false).await.unwrap();

		assert!(installer.is_installed(&image));
		assert_eq!(installer.executable(&image), Some(driver));
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn installs_file_reference() {
		let temp = TempDir::new().unwrap();
		let driver = write_driver(temp.path(), "go", 0o755);

		let installer = LocalInstaller::default();
		let image: ImageRef = format!("file://{}", driver.display()).parse().unwrap();
		installer.install(&image, false).await.unwrap();

		assert_eq!(installer.executable(&image), Some(driver));
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn non_executable_file_is_not_installed() {
		let temp = TempDir::new().unwrap();
		write_driver(temp.path(), "ruby-driver", 0o644);

		let installer = LocalInstaller::new(vec![temp.path().to_path_buf()]);
		let image: ImageRef = format!("file://{}", temp.path().join("ruby-driver").display())
			.parse()
			.unwrap();
		let err = installer.install(&image, false).await.unwrap_err();

		assert!(matches!(err, Error::ImageNotFound { .. }));
		assert!(!installer.is_installed(&image));
	}

	#[tokio::test]
	async fn missing_exec_image_reports_not_found() {
		let temp = TempDir::new().unwrap();
		let installer = LocalInstaller::new(vec![temp.path().to_path_buf()]);
		let image = ImageRef::default_for(ImageTransport::Exec, "no-such-language-zzz");

		let err = installer.install(&image, false).await.unwrap_err();
		assert!(err.is_image_error());
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn reinstall_is_idempotent_and_force_relocates() {
		let first = TempDir::new().unwrap();
		let second = TempDir::new().unwrap();
		let original = write_driver(first.path(), "rust-driver", 0o755);

		let installer = LocalInstaller::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
		let image = ImageRef::default_for(ImageTransport::Exec, "rust");
		installer.install(&image, false).await.unwrap();

		fs::remove_file(&original).unwrap();
		let replacement = write_driver(second.path(), "rust-driver", 0o755);

		installer.install(&image, false).await.unwrap();
		assert_eq!(installer.executable(&image), Some(original));

		installer.install(&image, true).await.unwrap();
		assert_eq!(installer.executable(&image), Some(replacement));
		assert_eq!(installer.installed().len(), 1);
	}
}
