use crate::body::BoxRead;
use futures_io::AsyncRead;
use std::io::Result;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

/// The wakers of both halves of a tee.
///
/// The source stream only remembers the most recent waker it was polled with, so it is always
/// polled with a waker that wakes both halves.
#[derive(Debug, Default)]
struct Wakers {
	slots: Mutex<[Option<Waker>; 2]>,
}

impl Wakers {
	/// Records the waker for one half.
	fn register(&self, side: usize, waker: &Waker) {
		let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
		match slots[side] {
			Some(ref existing) if existing.will_wake(waker) => (),
			_ => slots[side] = Some(waker.clone()),
		}
	}

	/// Wakes one half, if it is waiting.
	fn wake_side(&self, side: usize) {
		let waker = self.slots.lock().unwrap_or_else(PoisonError::into_inner)[side].take();
		if let Some(waker) = waker {
			waker.wake();
		}
	}
}

impl Wake for Wakers {
	fn wake(self: Arc<Self>) {
		self.wake_by_ref();
	}

	fn wake_by_ref(self: &Arc<Self>) {
		self.wake_side(0);
		self.wake_side(1);
	}
}

/// The state shared between the two halves.
struct Shared {
	/// The stream being duplicated.
	source: BoxRead,

	/// Data read from the source by one half but not yet delivered to the other, indexed by the
	/// half that is owed the data.
	pending: [Vec<u8>; 2],

	/// Whether each half still exists.
	alive: [bool; 2],

	/// Whether the source has reached end of input.
	eof: bool,

	/// The failure reported by the source, replayed to the half that did not observe it.
	failure: Option<(std::io::ErrorKind, String)>,

	/// The wakers of both halves.
	wakers: Arc<Wakers>,
}

/// One of the two readers produced by [`tee`].
pub(super) struct Half {
	/// The state shared with the other half.
	shared: Arc<Mutex<Shared>>,

	/// Which half this is, 0 or 1.
	side: usize,
}

impl Half {
	fn lock(&self) -> MutexGuard<'_, Shared> {
		self.shared.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Splits a single-consumption stream into two readers that each observe every byte.
///
/// Data read by one half is buffered until the other half reads it.
pub(super) fn tee(source: BoxRead) -> (Half, Half) {
	let shared = Arc::new(Mutex::new(Shared {
		source,
		pending: [Vec::new(), Vec::new()],
		alive: [true, true],
		eof: false,
		failure: None,
		wakers: Arc::default(),
	}));
	(
		Half {
			shared: Arc::clone(&shared),
			side: 0,
		},
		Half { shared, side: 1 },
	)
}

impl AsyncRead for Half {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		let side = self.side;
		let other = 1 - side;
		let mut guard = self.lock();
		let shared = &mut *guard;

		// Deliver anything the other half already pulled from the source on our behalf.
		if !shared.pending[side].is_empty() {
			let n = std::cmp::min(buf.len(), shared.pending[side].len());
			buf[..n].copy_from_slice(&shared.pending[side][..n]);
			let _ = shared.pending[side].drain(..n);
			return Ok(n).into();
		}
		if let Some((kind, ref message)) = shared.failure {
			return Err(std::io::Error::new(kind, message.clone())).into();
		}
		if shared.eof || buf.is_empty() {
			return Ok(0).into();
		}

		shared.wakers.register(side, cx.waker());
		let waker = Waker::from(Arc::clone(&shared.wakers));
		let mut source_cx = Context::from_waker(&waker);
		match shared.source.as_mut().poll_read(&mut source_cx, buf) {
			Poll::Pending => Poll::Pending,
			Poll::Ready(Err(e)) => {
				shared.failure = Some((e.kind(), e.to_string()));
				shared.wakers.wake_side(other);
				Err(e).into()
			}
			Poll::Ready(Ok(0)) => {
				shared.eof = true;
				shared.wakers.wake_side(other);
				Ok(0).into()
			}
			Poll::Ready(Ok(n)) => {
				if shared.alive[other] {
					shared.pending[other].extend_from_slice(&buf[..n]);
					shared.wakers.wake_side(other);
				}
				Ok(n).into()
			}
		}
	}
}

impl Drop for Half {
	fn drop(&mut self) {
		let side = self.side;
		let mut shared = self.lock();
		shared.alive[side] = false;
		shared.pending[side] = Vec::new();
	}
}

impl std::fmt::Debug for Half {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Half").field("side", &self.side).finish()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::util::io::read_to_end;
	use futures_executor::block_on;

	/// Tests that both halves see the whole stream when read one after the other.
	#[test]
	fn test_sequential() {
		block_on(async {
			let source: BoxRead = Box::pin(&b"Hello World!"[..]);
			let (mut left, mut right) = tee(source);
			let mut a = Vec::new();
			read_to_end(Pin::new(&mut left), &mut a).await.unwrap();
			let mut b = Vec::new();
			read_to_end(Pin::new(&mut right), &mut b).await.unwrap();
			assert_eq!(a, b"Hello World!");
			assert_eq!(b, b"Hello World!");
		});
	}

	/// Tests that a dropped half does not accumulate data.
	#[test]
	fn test_dropped_half() {
		block_on(async {
			let source: BoxRead = Box::pin(&b"abcdef"[..]);
			let (left, mut right) = tee(source);
			drop(left);
			let mut b = Vec::new();
			read_to_end(Pin::new(&mut right), &mut b).await.unwrap();
			assert_eq!(b, b"abcdef");
			assert!(right.lock().pending[0].is_empty());
		});
	}
}
