//! Driver instance running as a child process.
//!
//! The driver reads one request frame per parse from stdin and answers with
//! exactly one response frame on stdout. Closing stdin asks the driver to
//! exit.

use std::time::Duration;

use async_trait::async_trait;
use polyparse_protocol::{ParseRequest, ParseResponse};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::image::ImageRef;
use crate::transport::{FrameReader, FrameWriter};
use crate::worker::{Worker, WorkerId, next_worker_id};

/// Worker speaking the frame protocol over a child's stdio.
#[derive(Debug)]
pub struct ProcessWorker {
	id: WorkerId,
	image: ImageRef,
	child: Child,
	writer: Option<FrameWriter<ChildStdin>>,
	reader: FrameReader<ChildStdout>,
	shutdown_grace: Duration,
}

impl ProcessWorker {
	/// Wraps a spawned child whose stdin and stdout are piped.
	pub fn from_child(image: ImageRef, mut child: Child, shutdown_grace: Duration) -> Result<Self> {
		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| Error::LaunchFailed("driver stdin is not piped".to_string()))?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| Error::LaunchFailed("driver stdout is not piped".to_string()))?;

		Ok(Self {
			id: next_worker_id(),
			image,
			child,
			writer: Some(FrameWriter::new(stdin)),
			reader: FrameReader::new(stdout),
			shutdown_grace,
		})
	}

	pub fn pid(&self) -> Option<u32> {
		self.child.id()
	}

	pub fn image(&self) -> &ImageRef {
		&self.image
	}

	fn exited(&mut self, context: &str) -> Error {
		match self.child.try_wait() {
			Ok(Some(status)) => Error::WorkerExited(format!("{context}: driver exited with {status}")),
			_ => Error::WorkerExited(context.to_string()),
		}
	}
}

#[async_trait]
impl Worker for ProcessWorker {
	fn id(&self) -> WorkerId {
		self.id
	}

	async fn parse(&mut self, request: &ParseRequest) -> Result<ParseResponse> {
		let Some(writer) = self.writer.as_mut() else {
			return Err(Error::WorkerExited(format!("worker {} is closed", self.id)));
		};

		if let Err(e) = writer.send(request).await {
			debug!(target = "polyparse.runtime", worker = self.id, error = %e, "request write failed");
			return Err(self.exited("failed to send request"));
		}

		match self.reader.recv::<ParseResponse>().await? {
			Some(response) => Ok(response),
			None => Err(self.exited("driver closed stdout before responding")),
		}
	}

	async fn close(&mut self) -> Result<()> {
		// Dropping stdin is the driver's signal to exit.
		drop(self.writer.take());

		match tokio::time::timeout(self.shutdown_grace, self.child.wait()).await {
			Ok(Ok(status)) => {
				debug!(target = "polyparse.runtime", worker = self.id, %status, "driver exited");
				Ok(())
			}
			Ok(Err(e)) => Err(Error::Io(e)),
			Err(_) => {
				warn!(
					target = "polyparse.runtime",
					worker = self.id,
					image = %self.image,
					grace_ms = u64::try_from(self.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
					"driver did not exit in time; killing"
				);
				self.child
					.kill()
					.await
					.map_err(|e| Error::LaunchFailed(format!("Failed to kill process: {e}")))
			}
		}
	}
}
