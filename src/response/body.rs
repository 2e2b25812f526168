mod chunked;
mod eof;
mod fixed;

use crate::agent::{Agent, BoxSocket};
use futures_core::ready;
use futures_io::AsyncRead;
use std::io::Result;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use url::Url;

/// How a response body is delimited on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Framing {
	/// The body is exactly this many bytes long.
	Fixed(u64),

	/// The body uses chunked transfer coding.
	Chunked,

	/// The body runs until the server closes the connection.
	Eof,
}

/// The framing state of the body being received.
#[derive(Debug)]
enum Impl {
	Chunked(chunked::Receive),
	Eof(eof::Receive),
	Fixed(fixed::Receive),
}

impl Impl {
	/// Returns whether the whole body has been received, leaving the connection at the start of the
	/// next response.
	fn is_complete(&self) -> bool {
		match self {
			Self::Chunked(chunked) => chunked.is_complete(),
			Self::Eof(_) => false,
			Self::Fixed(fixed) => fixed.is_complete(),
		}
	}
}

/// Where a reusable connection goes once its body has been read.
pub(crate) struct Recycler {
	/// The agent that produced the connection.
	pub(crate) agent: Arc<dyn Agent>,

	/// The URL the connection was opened for.
	pub(crate) url: Url,
}

impl std::fmt::Debug for Recycler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Recycler").field("url", &self.url.as_str()).finish()
	}
}

/// An HTTP response body being received over a socket the body owns.
///
/// This implements [`AsyncRead`], yielding the body with its transfer coding removed. Once the
/// body has been read to its end, the socket is handed back to the agent if the connection can
/// persist, or closed otherwise. Dropping a `Receive` early closes the socket.
pub(crate) struct Receive {
	/// The socket, or `None` once the body is finished.
	socket: Option<BoxSocket>,

	/// The body receiving implementation.
	body_impl: Impl,

	/// Whether the request and response headers permit the socket to persist after the body.
	persistent: bool,

	/// Where to return the socket.
	recycler: Option<Recycler>,
}

impl Receive {
	/// Constructs a new `Receive`.
	///
	/// The `socket` parameter is the socket positioned at the start of the body. The `persistent`
	/// parameter indicates whether the connection can persist after the response is read, and the
	/// `recycler` parameter where it should go if so.
	pub(crate) fn new(
		socket: BoxSocket,
		framing: Framing,
		persistent: bool,
		recycler: Option<Recycler>,
	) -> Self {
		let mut ret = Self {
			socket: Some(socket),
			body_impl: match framing {
				Framing::Fixed(length) => Impl::Fixed(fixed::Receive::new(length)),
				Framing::Chunked => Impl::Chunked(chunked::Receive::new()),
				Framing::Eof => Impl::Eof(eof::Receive),
			},
			persistent: persistent && framing != Framing::Eof,
			recycler,
		};
		// An empty fixed body is already finished.
		ret.finish_if_complete();
		ret
	}

	/// Releases the socket if the body has been fully received.
	fn finish_if_complete(&mut self) {
		if !self.body_impl.is_complete() {
			return;
		}
		let Some(socket) = self.socket.take() else {
			return;
		};
		match self.recycler.take() {
			Some(recycler) if self.persistent => {
				tracing::trace!(url = %recycler.url, "returning connection to agent");
				recycler.agent.recycle(&recycler.url, socket);
			}
			_ => drop(socket),
		}
	}
}

impl std::fmt::Debug for Receive {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Receive")
			.field("open", &self.socket.is_some())
			.field("body_impl", &self.body_impl)
			.field("persistent", &self.persistent)
			.field("recycler", &self.recycler)
			.finish()
	}
}

impl AsyncRead for Receive {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		let this = self.get_mut();
		if buf.is_empty() {
			return Ok(0).into();
		}
		let Some(socket) = this.socket.as_mut() else {
			return Ok(0).into();
		};
		let socket = Pin::new(socket);
		let bytes_read = ready!(match this.body_impl {
			Impl::Chunked(ref mut chunked) => chunked.poll_read(socket, cx, buf),
			Impl::Eof(ref mut eof) => eof.poll_read(socket, cx, buf),
			Impl::Fixed(ref mut fixed) => fixed.poll_read(socket, cx, buf),
		})?;
		this.finish_if_complete();
		if bytes_read == 0 {
			// End of an EOF-delimited body; the connection is done either way.
			this.socket = None;
		}
		Ok(bytes_read).into()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::util::io::read_to_end;
	use futures_core::future::BoxFuture;
	use futures_executor::block_on;
	use std::sync::Mutex;

	/// An agent that records recycled sockets.
	#[derive(Debug, Default)]
	struct Collector {
		recycled: Mutex<Vec<String>>,
	}

	impl Agent for Collector {
		fn connect<'a>(&'a self, _url: &'a Url) -> BoxFuture<'a, Result<BoxSocket>> {
			Box::pin(async { Err(std::io::Error::from(std::io::ErrorKind::Unsupported)) })
		}

		fn recycle(&self, url: &Url, _socket: BoxSocket) {
			self.recycled.lock().unwrap().push(url.to_string());
		}
	}

	/// A socket over canned input.
	fn socket(data: &'static [u8]) -> BoxSocket {
		Box::new(Canned(data))
	}

	/// Reads canned input and discards writes.
	#[derive(Debug)]
	struct Canned(&'static [u8]);

	impl AsyncRead for Canned {
		fn poll_read(
			mut self: Pin<&mut Self>,
			cx: &mut Context<'_>,
			buf: &mut [u8],
		) -> Poll<Result<usize>> {
			Pin::new(&mut self.0).poll_read(cx, buf)
		}
	}

	impl futures_io::AsyncBufRead for Canned {
		fn poll_fill_buf(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<&[u8]>> {
			Ok(self.get_mut().0).into()
		}

		fn consume(mut self: Pin<&mut Self>, amt: usize) {
			self.0 = &self.0[amt..];
		}
	}

	impl futures_io::AsyncWrite for Canned {
		fn poll_write(
			self: Pin<&mut Self>,
			_cx: &mut Context<'_>,
			buf: &[u8],
		) -> Poll<Result<usize>> {
			Ok(buf.len()).into()
		}

		fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
			Ok(()).into()
		}

		fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
			Ok(()).into()
		}
	}

	fn recycler(agent: &Arc<Collector>) -> Option<Recycler> {
		let agent: Arc<dyn Agent> = agent.clone();
		Some(Recycler {
			agent,
			url: Url::parse("http://example.com/").unwrap(),
		})
	}

	/// Tests that a complete persistent body returns the socket to the agent.
	#[test]
	fn test_recycle_fixed() {
		let agent = Arc::new(Collector::default());
		let mut rx = Receive::new(socket(b"hello"), Framing::Fixed(5), true, recycler(&agent));
		let mut out = Vec::new();
		block_on(read_to_end(Pin::new(&mut rx), &mut out)).unwrap();
		assert_eq!(out, b"hello");
		assert_eq!(*agent.recycled.lock().unwrap(), ["http://example.com/"]);
	}

	/// Tests that a chunked body returns the socket once the terminating chunk is read.
	#[test]
	fn test_recycle_chunked() {
		let agent = Arc::new(Collector::default());
		let mut rx = Receive::new(
			socket(b"3\r\nabc\r\n0\r\n\r\n"),
			Framing::Chunked,
			true,
			recycler(&agent),
		);
		let mut out = Vec::new();
		block_on(read_to_end(Pin::new(&mut rx), &mut out)).unwrap();
		assert_eq!(out, b"abc");
		assert_eq!(agent.recycled.lock().unwrap().len(), 1);
	}

	/// Tests that non-persistent, EOF-delimited and unfinished bodies are not recycled.
	#[test]
	fn test_no_recycle() {
		let agent = Arc::new(Collector::default());
		let mut rx = Receive::new(socket(b"hello"), Framing::Fixed(5), false, recycler(&agent));
		let mut out = Vec::new();
		block_on(read_to_end(Pin::new(&mut rx), &mut out)).unwrap();

		let mut rx = Receive::new(socket(b"hello"), Framing::Eof, true, recycler(&agent));
		let mut out = Vec::new();
		block_on(read_to_end(Pin::new(&mut rx), &mut out)).unwrap();
		assert_eq!(out, b"hello");

		let rx = Receive::new(socket(b"hello"), Framing::Fixed(5), true, recycler(&agent));
		drop(rx);
		assert!(agent.recycled.lock().unwrap().is_empty());
	}

	/// Tests that an empty body is finished immediately.
	#[test]
	fn test_empty() {
		let agent = Arc::new(Collector::default());
		let rx = Receive::new(socket(b""), Framing::Fixed(0), true, recycler(&agent));
		assert!(rx.socket.is_none());
		assert_eq!(agent.recycled.lock().unwrap().len(), 1);
	}
}
