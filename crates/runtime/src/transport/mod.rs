//! Length-prefixed JSON framing over byte streams.
//!
//! Each frame is a little-endian `u32` byte count followed by that many bytes
//! of UTF-8 JSON. Drivers read request frames on stdin and answer with one
//! response frame per request on stdout.


use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest frame either side will send or accept (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Writes frames to an async byte sink.
#[derive(Debug)]
pub struct FrameWriter<W> {
	inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
	pub fn new(inner: W) -> Self {
		Self { inner }
	}

	/// Serializes `message` and writes it as one frame.
	pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
		let payload = serde_json::to_vec(message)?;
		if payload.len() > MAX_FRAME_LEN {
			return Err(Error::FrameTooLarge {
				len: payload.len(),
				max: MAX_FRAME_LEN,
			});
		}

		let length = payload.len() as u32;
		self.inner
			.write_all(&length.to_le_bytes())
			.await
			.map_err(|e| Error::Transport(format!("Failed to write length prefix: {e}")))?;
		self.inner
			.write_all(&payload)
			.await
			.map_err(|e| Error::Transport(format!("Failed to write frame body: {e}")))?;
		self.inner
			.flush()
			.await
			.map_err(|e| Error::Transport(format!("Failed to flush frame: {e}")))?;
		Ok(())
	}

	pub fn into_inner(self) -> W {
		self.inner
	}
}

/// Reads frames from an async byte source.
#[derive(Debug)]
pub struct FrameReader<R> {
	inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
	pub fn new(inner: R) -> Self {
		Self { inner }
	}

	/// Reads the next frame.
	///
	/// Returns `Ok(None)` on a clean end of stream (no bytes of a new frame
	/// were read). A stream that ends mid-frame is a transport error.
	pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
		let mut len_buf = [0u8; 4];
		let mut filled = 0;
		while filled < len_buf.len() {
			let n = self
				.inner
				.read(&mut len_buf[filled..])
				.await
				.map_err(|e| Error::Transport(format!("Failed to read length prefix: {e}")))?;
			if n == 0 {
				if filled == 0 {
					return Ok(None);
				}
				return Err(Error::Transport(
					"Failed to read length prefix: stream ended mid-prefix".to_string(),
				));
			}
			filled += n;
		}

		let length = u32::from_le_bytes(len_buf) as usize;
		if length > MAX_FRAME_LEN {
			return Err(Error::FrameTooLarge {
				len: length,
				max: MAX_FRAME_LEN,
			});
		}

		let mut payload = vec![0u8; length];
		self.inner
			.read_exact(&mut payload)
			.await
			.map_err(|e| Error::Transport(format!("Failed to read frame body: {e}")))?;

		Ok(Some(serde_json::from_slice(&payload)?))
	}

	pub fn into_inner(self) -> R {
		self.inner
	}
}
