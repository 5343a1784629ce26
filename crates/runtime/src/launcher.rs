//! Worker launch.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::image::ImageRef;
use crate::installer::LocalInstaller;
use crate::process::ProcessWorker;
use crate::worker::Worker;

/// Starts driver instances from installed images.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
	/// Returns a live, ready-to-use worker or a launch error.
	async fn start(&self, image: &ImageRef) -> Result<Box<dyn Worker>>;
}

/// Process launch settings.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
	/// Extra arguments passed to every driver.
	pub args: Vec<String>,
	/// Extra environment passed to every driver.
	pub env: Vec<(String, String)>,
	/// How long a fresh process must stay up to count as started.
	pub startup_grace: Duration,
	/// How long `close` waits for a driver to exit before killing it.
	pub shutdown_grace: Duration,
}

impl Default for LaunchOptions {
	fn default() -> Self {
		Self {
			args: Vec::new(),
			env: Vec::new(),
			startup_grace: Duration::from_millis(100),
			shutdown_grace: Duration::from_secs(5),
		}
	}
}

/// Launches installed images as child processes.
#[derive(Debug)]
pub struct ProcessLauncher {
	installer: Arc<LocalInstaller>,
	options: LaunchOptions,
}

impl ProcessLauncher {
	pub fn new(installer: Arc<LocalInstaller>, options: LaunchOptions) -> Self {
		Self { installer, options }
	}
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
	async fn start(&self, image: &ImageRef) -> Result<Box<dyn Worker>> {
		let executable = self
			.installer
			.executable(image)
			.ok_or_else(|| Error::NotInstalled(image.to_string()))?;

		let mut cmd = Command::new(&executable);
		cmd.args(&self.options.args)
			.envs(self.options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
			.env("POLYPARSE_IMAGE", image.to_string())
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true);

		let mut child = cmd
			.spawn()
			.map_err(|e| Error::LaunchFailed(format!("Failed to spawn {}: {e}", executable.display())))?;

		tokio::time::sleep(self.options.startup_grace).await;

		match child.try_wait() {
			Ok(Some(status)) => {
				return Err(Error::LaunchFailed(format!(
					"{} exited immediately with status: {status}",
					executable.display()
				)));
			}
			Ok(None) => {}
			Err(e) => {
				return Err(Error::LaunchFailed(format!("Failed to check process status: {e}")));
			}
		}

		let worker = ProcessWorker::from_child(image.clone(), child, self.options.shutdown_grace)?;
		debug!(
			target = "polyparse.runtime",
			image = %image,
			worker = worker.id(),
			pid = worker.pid(),
			"driver process started"
		);
		Ok(Box::new(worker))
	}
}
