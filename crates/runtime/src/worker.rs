//! The capability set every driver instance exposes.
//!
//! Pools and the registry only ever see `Box<dyn Worker>`. Whether the driver
//! runs in a child process ([`ProcessWorker`](crate::ProcessWorker)) or inside
//! this process ([`InProcessWorker`]) is invisible to them.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use polyparse_protocol::{ParseRequest, ParseResponse};

use crate::error::Result;

/// Process-unique worker identifier, used in logs and pool bookkeeping.
pub type WorkerId = u64;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique worker ID.
pub fn next_worker_id() -> WorkerId {
	NEXT_WORKER_ID.fetch_add(1, Ordering::SeqCst)
}

/// One running driver instance.
///
/// Methods take `&mut self`: a worker is owned by exactly one holder at a time,
/// so it can never serve two requests concurrently.
#[async_trait]
pub trait Worker: Send {
	fn id(&self) -> WorkerId;

	/// Parses one request.
	///
	/// `Ok` means the driver answered, whatever the response status. `Err`
	/// means the worker itself failed and must not be reused.
	async fn parse(&mut self, request: &ParseRequest) -> Result<ParseResponse>;

	/// Stops the worker. Calling `parse` afterwards is an error.
	async fn close(&mut self) -> Result<()>;
}

type ParseFn = Box<dyn FnMut(&ParseRequest) -> Result<ParseResponse> + Send>;

/// Worker backed by a closure running in this process.
pub struct InProcessWorker {
	id: WorkerId,
	parse: ParseFn,
	closed: bool,
}

impl InProcessWorker {
	pub fn new<F>(parse: F) -> Self
	where
		F: FnMut(&ParseRequest) -> Result<ParseResponse> + Send + 'static,
	{
		Self {
			id: next_worker_id(),
			parse: Box::new(parse),
			closed: false,
		}
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}
}

impl std::fmt::Debug for InProcessWorker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InProcessWorker")
			.field("id", &self.id)
			.field("closed", &self.closed)
			.finish_non_exhaustive()
	}
}

#[async_trait]
impl Worker for InProcessWorker {
	fn id(&self) -> WorkerId {
		self.id
	}

	async fn parse(&mut self, request: &ParseRequest) -> Result<ParseResponse> {
		if self.closed {
			return Err(crate::Error::WorkerExited(format!("worker {} is closed", self.id)));
		}
		(self.parse)(request)
	}

	async fn close(&mut self) -> Result<()> {
		self.closed = true;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use polyparse_protocol::Status;
	use serde_json::json;

	use super::*;

	#[test]
	fn worker_ids_are_unique() {
		let a = next_worker_id();
		let b = next_worker_id();
		assert_ne!(a, b);
	}

	#[tokio::test]
	async fn in_process_worker_runs_closure() {
		let mut worker = InProcessWorker::new(|req| Ok(ParseResponse::ok(json!({ "file": req.filename }))));
		let response = worker.parse(&ParseRequest::new("a.go", "package main")).await.unwrap();
		assert_eq!(response.status, Status::Ok);
		assert_eq!(response.ast.unwrap()["file"], "a.go");
	}

	#[tokio::test]
	async fn closed_worker_refuses_requests() {
		let mut worker = InProcessWorker::new(|_| Ok(ParseResponse::default()));
		worker.close().await.unwrap();
		assert!(worker.is_closed());
		assert!(worker.parse(&ParseRequest::default()).await.is_err());
	}
}
