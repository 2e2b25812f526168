use futures_io::AsyncRead;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The framing state of a response body that ends when the server closes the connection.
///
/// Such a body is never complete in the sense of leaving the connection reusable.
#[derive(Debug)]
pub(super) struct Receive;

impl Receive {
	/// Reads body bytes from `socket`.
	#[allow(clippy::unused_self)] // Kept a method for symmetry with the other framings.
	pub(super) fn poll_read<Socket: AsyncRead + ?Sized>(
		&mut self,
		socket: Pin<&mut Socket>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		socket.poll_read(cx, buf)
	}
}
