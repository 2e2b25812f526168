use futures_core::ready;
use futures_io::AsyncRead;
use std::io::{ErrorKind, Result};
use std::pin::Pin;
use std::task::{Context, Poll};

/// The framing state of a response body whose length is known a priori from a `Content-Length`
/// header (or is implied zero).
#[derive(Debug)]
pub(super) struct Receive {
	/// The amount of body left for the caller to receive.
	remaining: u64,
}

impl Receive {
	/// Constructs a new `Receive`.
	///
	/// The `length` parameter is the length of the response body.
	pub(super) fn new(length: u64) -> Self {
		Self { remaining: length }
	}

	/// Returns whether the entire response body has been received.
	pub(super) fn is_complete(&self) -> bool {
		self.remaining == 0
	}

	/// Reads body bytes from `socket`.
	pub(super) fn poll_read<Socket: AsyncRead + ?Sized>(
		&mut self,
		socket: Pin<&mut Socket>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		if self.remaining == 0 {
			Ok(0).into()
		} else {
			let to_read = std::cmp::min(buf.len() as u64, self.remaining) as usize;
			let bytes_read = ready!(socket.poll_read(cx, &mut buf[..to_read]))?;
			if bytes_read == 0 {
				Err(ErrorKind::UnexpectedEof.into()).into()
			} else {
				self.remaining -= bytes_read as u64;
				Ok(bytes_read).into()
			}
		}
	}
}
