mod protocol;
mod server;

use std::fmt;
use std::path::PathBuf;

use anyhow::Context;
pub use protocol::{DaemonRequest, DaemonResponse};
use polyparse_protocol::{DriverInfo, ParseRequest, ParseResponse};
pub use server::Daemon;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{CliError, Result};

pub const DAEMON_TCP_ADDR: &str = "127.0.0.1:7170";

/// Returns the daemon socket path for the current user.
///
/// Uses `$XDG_RUNTIME_DIR/polyparse.sock` if available (already user-permissioned),
/// otherwise falls back to `/tmp/polyparse-{uid}.sock`.
#[cfg(unix)]
pub fn daemon_socket_path() -> PathBuf {
	if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
		return PathBuf::from(xdg_runtime).join("polyparse.sock");
	}

	let uid = unsafe { libc::getuid() };
	PathBuf::from(format!("/tmp/polyparse-{uid}.sock"))
}

/// Where the daemon listens and clients connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
	#[cfg(unix)]
	Unix(PathBuf),
	Tcp(String),
}

impl Endpoint {
	/// TCP when an address is given, otherwise the socket path (or the
	/// per-user default). Non-unix platforms always use TCP.
	pub fn resolve(socket: Option<PathBuf>, listen: Option<String>) -> Self {
		if let Some(addr) = listen {
			return Endpoint::Tcp(addr);
		}
		#[cfg(unix)]
		{
			Endpoint::Unix(socket.unwrap_or_else(daemon_socket_path))
		}
		#[cfg(not(unix))]
		{
			let _ = socket;
			Endpoint::Tcp(DAEMON_TCP_ADDR.to_string())
		}
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			#[cfg(unix)]
			Endpoint::Unix(path) => write!(f, "{}", path.display()),
			Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
		}
	}
}

/// Newline-delimited JSON client for a running daemon.
#[derive(Debug, Clone)]
pub struct DaemonClient {
	endpoint: Endpoint,
}

impl DaemonClient {
	pub fn new(endpoint: Endpoint) -> Self {
		Self { endpoint }
	}

	pub fn endpoint(&self) -> &Endpoint {
		&self.endpoint
	}

	/// True when something accepts connections at the endpoint.
	pub async fn is_running(&self) -> bool {
		match self.send(DaemonRequest::Ping).await {
			Ok(DaemonResponse::Pong) => true,
			Ok(other) => {
				debug!(target = "polyparse.daemon", response = ?other, "unexpected ping response");
				false
			}
			Err(_) => false,
		}
	}

	pub async fn ping(&self) -> Result<()> {
		match self.send(DaemonRequest::Ping).await? {
			DaemonResponse::Pong => Ok(()),
			other => Err(unexpected(other)),
		}
	}

	pub async fn parse(&self, request: ParseRequest) -> Result<ParseResponse> {
		match self.send(DaemonRequest::Parse { request }).await? {
			DaemonResponse::Parsed { response } => Ok(response),
			other => Err(unexpected(other)),
		}
	}

	pub async fn add_driver(&self, language: &str, image: &str) -> Result<()> {
		self.expect_ok(DaemonRequest::AddDriver {
			language: language.to_string(),
			image: image.to_string(),
		})
		.await
	}

	pub async fn remove_driver(&self, language: &str) -> Result<()> {
		self.expect_ok(DaemonRequest::RemoveDriver {
			language: language.to_string(),
		})
		.await
	}

	pub async fn drivers(&self) -> Result<Vec<DriverInfo>> {
		match self.send(DaemonRequest::ListDrivers).await? {
			DaemonResponse::Drivers { list } => Ok(list),
			other => Err(unexpected(other)),
		}
	}

	pub async fn shutdown(&self) -> Result<()> {
		self.expect_ok(DaemonRequest::Shutdown).await
	}

	async fn expect_ok(&self, request: DaemonRequest) -> Result<()> {
		match self.send(request).await? {
			DaemonResponse::Ok => Ok(()),
			other => Err(unexpected(other)),
		}
	}

	async fn send(&self, request: DaemonRequest) -> Result<DaemonResponse> {
		debug!(target = "polyparse.daemon", endpoint = %self.endpoint, request = ?request, "sending request");
		match &self.endpoint {
			#[cfg(unix)]
			Endpoint::Unix(path) => {
				let stream = UnixStream::connect(path)
					.await
					.map_err(|err| self.connect_error(err))?;
				send_request_stream(stream, &request).await
			}
			Endpoint::Tcp(addr) => {
				let stream = TcpStream::connect(addr.as_str())
					.await
					.map_err(|err| self.connect_error(err))?;
				send_request_stream(stream, &request).await
			}
		}
	}

	fn connect_error(&self, err: std::io::Error) -> CliError {
		if is_not_running(&err) {
			CliError::DaemonNotRunning(self.endpoint.to_string())
		} else {
			CliError::Io(err)
		}
	}
}

fn unexpected(response: DaemonResponse) -> CliError {
	match response {
		DaemonResponse::Error { code, message } => CliError::Daemon { code, message },
		other => CliError::Daemon {
			code: "unexpected_response".to_string(),
			message: format!("{other:?}"),
		},
	}
}

fn is_not_running(err: &std::io::Error) -> bool {
	matches!(
		err.kind(),
		std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
	)
}

async fn send_request_stream<S>(mut stream: S, request: &DaemonRequest) -> Result<DaemonResponse>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(request).context("Failed to serialize daemon request")?;
	stream
		.write_all(format!("{payload}\n").as_bytes())
		.await
		.context("Failed writing daemon request")?;
	stream
		.flush()
		.await
		.context("Failed flushing daemon request")?;

	let mut reader = BufReader::new(stream);
	let mut line = String::new();
	let bytes = reader
		.read_line(&mut line)
		.await
		.context("Failed reading daemon response")?;
	if bytes == 0 {
		return Err(anyhow::anyhow!("Daemon closed the connection without responding").into());
	}
	let response = serde_json::from_str(&line).context("Failed parsing daemon response")?;
	Ok(response)
}
