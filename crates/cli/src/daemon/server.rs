use std::sync::Arc;

use anyhow::{Context, Result};
use polyparse::{Error as DispatchError, Registry};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::{DaemonRequest, DaemonResponse};
use super::{DaemonClient, Endpoint};

enum Listener {
	#[cfg(unix)]
	Unix(UnixListener),
	Tcp(TcpListener),
}

/// Serves parse traffic for one [`Registry`] until asked to stop.
pub struct Daemon {
	registry: Arc<Registry>,
	endpoint: Endpoint,
	listener: Listener,
	shutdown_tx: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
}

impl Daemon {
	pub async fn bind(registry: Arc<Registry>, endpoint: Endpoint) -> Result<Self> {
		let listener = match &endpoint {
			#[cfg(unix)]
			Endpoint::Unix(socket_path) => {
				if socket_path.exists() {
					if DaemonClient::new(endpoint.clone()).is_running().await {
						anyhow::bail!("A daemon is already listening on {}", socket_path.display());
					}
					std::fs::remove_file(socket_path).with_context(|| {
						format!("Failed to remove existing socket: {}", socket_path.display())
					})?;
				}
				// Ensure parent directory exists (for XDG_RUNTIME_DIR fallback)
				if let Some(parent) = socket_path.parent() {
					if !parent.exists() {
						std::fs::create_dir_all(parent).with_context(|| {
							format!("Failed to create socket directory: {}", parent.display())
						})?;
					}
				}
				let listener = UnixListener::bind(socket_path)
					.with_context(|| format!("Failed to bind daemon socket: {}", socket_path.display()))?;
				Listener::Unix(listener)
			}
			Endpoint::Tcp(addr) => {
				let listener = TcpListener::bind(addr.as_str())
					.await
					.with_context(|| format!("Failed to bind daemon TCP socket: {addr}"))?;
				Listener::Tcp(listener)
			}
		};

		info!(target = "polyparse.daemon", endpoint = %endpoint, "daemon listening");

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		Ok(Self {
			registry,
			endpoint,
			listener,
			shutdown_tx,
			shutdown_rx,
		})
	}

	pub fn endpoint(&self) -> &Endpoint {
		&self.endpoint
	}

	/// Accepts clients until a `shutdown` request or SIGINT/SIGTERM, then
	/// shuts the registry down.
	pub async fn run(mut self) -> Result<()> {
		let signal = shutdown_signal();
		tokio::pin!(signal);

		loop {
			tokio::select! {
				_ = self.shutdown_rx.wait_for(|stop| *stop) => {
					info!(target = "polyparse.daemon", "shutdown requested via message");
					break;
				}
				received = &mut signal => {
					let name = received?;
					info!(target = "polyparse.daemon", signal = name, "received signal, shutting down");
					break;
				}
				accepted = accept(&self.listener) => {
					let stream = accepted.context("Daemon accept failed")?;
					let registry = Arc::clone(&self.registry);
					let shutdown_tx = self.shutdown_tx.clone();
					tokio::spawn(async move {
						if let Err(err) = handle_client(stream, registry, shutdown_tx).await {
							warn!(target = "polyparse.daemon", error = %err, "daemon connection error");
						}
					});
				}
			}
		}

		if let Err(err) = self.registry.shutdown().await {
			warn!(target = "polyparse.daemon", error = %err, "error during shutdown");
		}

		#[cfg(unix)]
		{
			if let Endpoint::Unix(path) = &self.endpoint {
				if let Err(err) = std::fs::remove_file(path) {
					debug!(target = "polyparse.daemon", error = %err, "failed to remove socket");
				}
			}
		}

		Ok(())
	}
}

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

async fn accept(listener: &Listener) -> std::io::Result<Box<dyn Connection>> {
	match listener {
		#[cfg(unix)]
		Listener::Unix(listener) => {
			let (stream, _) = listener.accept().await?;
			Ok(Box::new(stream))
		}
		Listener::Tcp(listener) => {
			let (stream, peer) = listener.accept().await?;
			debug!(target = "polyparse.daemon", %peer, "client connected");
			Ok(Box::new(stream))
		}
	}
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
	tokio::select! {
		_ = sigterm.recv() => Ok("SIGTERM"),
		_ = sigint.recv() => Ok("SIGINT"),
	}
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
	tokio::signal::ctrl_c()
		.await
		.context("Failed to install Ctrl+C handler")?;
	Ok("Ctrl+C")
}

async fn handle_client<S>(stream: S, registry: Arc<Registry>, shutdown_tx: watch::Sender<bool>) -> Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let (read_half, mut write_half) = tokio::io::split(stream);
	let mut reader = BufReader::new(read_half);
	let mut line = String::new();

	loop {
		line.clear();
		let bytes = reader
			.read_line(&mut line)
			.await
			.context("Failed reading daemon request")?;
		if bytes == 0 {
			break;
		}
		if line.trim().is_empty() {
			continue;
		}

		let request = match serde_json::from_str::<DaemonRequest>(line.trim_end()) {
			Ok(req) => req,
			Err(err) => {
				let response = DaemonResponse::Error {
					code: "invalid_request".to_string(),
					message: err.to_string(),
				};
				write_response(&mut write_half, &response).await?;
				continue;
			}
		};

		let stop = matches!(request, DaemonRequest::Shutdown);
		let response = handle_request(&registry, request).await;
		write_response(&mut write_half, &response).await?;
		if stop {
			shutdown_tx.send_replace(true);
			break;
		}
	}

	Ok(())
}

async fn write_response<W>(writer: &mut W, response: &DaemonResponse) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(response).context("Failed to serialize response")?;
	writer
		.write_all(format!("{payload}\n").as_bytes())
		.await
		.context("Failed writing daemon response")?;
	writer
		.flush()
		.await
		.context("Failed flushing daemon response")?;
	Ok(())
}

async fn handle_request(registry: &Registry, request: DaemonRequest) -> DaemonResponse {
	match request {
		DaemonRequest::Ping => DaemonResponse::Pong,
		DaemonRequest::Parse { request } => DaemonResponse::Parsed {
			response: registry.dispatch(request).await,
		},
		DaemonRequest::AddDriver { language, image } => match registry.add_driver(&language, &image).await {
			Ok(()) => DaemonResponse::Ok,
			Err(err) => daemon_error(&err),
		},
		DaemonRequest::RemoveDriver { language } => match registry.remove_driver(&language).await {
			Ok(()) => DaemonResponse::Ok,
			Err(err) => daemon_error(&err),
		},
		DaemonRequest::ListDrivers => DaemonResponse::Drivers {
			list: registry.drivers(),
		},
		DaemonRequest::Shutdown => DaemonResponse::Ok,
	}
}

fn daemon_error(err: &DispatchError) -> DaemonResponse {
	let code = match err {
		DispatchError::AlreadyInstalled { .. } => "already_installed",
		DispatchError::NotInstalled { .. } => "not_installed",
		DispatchError::ClosedPool { .. } => "closed",
		DispatchError::Runtime { .. } => "runtime_failure",
		DispatchError::MissingDriver { .. } => "missing_driver",
		DispatchError::PoolTimeout { .. } => "timeout",
		_ => "internal_error",
	};
	DaemonResponse::Error {
		code: code.to_string(),
		message: err.to_string(),
	}
}
