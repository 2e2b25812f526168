use crate::error::BadChunkHeader;
use futures_core::ready;
use futures_io::AsyncBufRead;
use std::io::Result;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The longest chunk header line, including extensions, or trailer field line accepted.
const MAX_LINE: usize = 8 * 1024;

/// The different states that the decoder can be in.
///
/// Line terminators may be CRLF or bare LF.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
	/// The size part of a chunk header is being read, and no characters have been seen yet.
	SizeFirst,

	/// The size part of a chunk header is being read, and at least one hex digit has been seen.
	///
	/// The contained value is the decoded chunk size read so far.
	SizeRest(u64),

	/// The chunk extensions are being read.
	///
	/// The contained values are the chunk size and the length of the line so far.
	Ext(u64, usize),

	/// The LF at the end of a chunk header is being read.
	///
	/// The contained value is the chunk size.
	HeaderLF(u64),

	/// The chunk data is being read.
	///
	/// The contained value is the remaining chunk size.
	Data(NonZeroU64),

	/// The CR following the chunk data is being read.
	DataCR,

	/// The LF following the chunk data is being read.
	DataLF,

	/// The start of a trailer field line, or the final empty line, is being read.
	TrailerStart,

	/// A trailer field line is being read and discarded.
	///
	/// The contained value is the length of the line so far.
	Trailer(usize),

	/// The LF of the final empty line is being read.
	FinalLF,

	/// Everything has been read.
	Done,
}

impl State {
	/// Returns the state that follows a complete chunk header.
	fn after_header(chunk_size: u64) -> Self {
		NonZeroU64::new(chunk_size).map_or(Self::TrailerStart, Self::Data)
	}

	/// Consumes one framing byte.
	///
	/// This must not be called in [`State::Data`] or [`State::Done`].
	fn advance(self, b: u8) -> std::result::Result<Self, BadChunkHeader> {
		Ok(match self {
			Self::SizeFirst => match hex_value(b) {
				Some(nybble) => Self::SizeRest(nybble),
				None => return Err(BadChunkHeader::SizeNotHex),
			},

			Self::SizeRest(size_so_far) => match b {
				b'\r' => Self::HeaderLF(size_so_far),
				b'\n' => Self::after_header(size_so_far),
				b';' | b' ' | b'\t' => Self::Ext(size_so_far, 0),
				_ => {
					let nybble = hex_value(b).ok_or(BadChunkHeader::SizeNotHex)?;
					if size_so_far >= 0x1000_0000_0000_0000_u64 {
						// Adding another digit would overflow.
						return Err(BadChunkHeader::SizeNotU64);
					}
					Self::SizeRest((size_so_far << 4) | nybble)
				}
			},

			Self::Ext(chunk_size, length) => match b {
				b'\r' => Self::HeaderLF(chunk_size),
				b'\n' => Self::after_header(chunk_size),
				_ if length >= MAX_LINE => return Err(BadChunkHeader::LineTooLong),
				_ => Self::Ext(chunk_size, length + 1),
			},

			Self::HeaderLF(chunk_size) => match b {
				b'\n' => Self::after_header(chunk_size),
				_ => return Err(BadChunkHeader::Newline),
			},

			Self::DataCR => match b {
				b'\r' => Self::DataLF,
				b'\n' => Self::SizeFirst,
				_ => return Err(BadChunkHeader::Newline),
			},

			Self::DataLF => match b {
				b'\n' => Self::SizeFirst,
				_ => return Err(BadChunkHeader::Newline),
			},

			Self::TrailerStart => match b {
				b'\r' => Self::FinalLF,
				b'\n' => Self::Done,
				_ => Self::Trailer(1),
			},

			Self::Trailer(length) => match b {
				b'\n' => Self::TrailerStart,
				_ if length >= MAX_LINE => return Err(BadChunkHeader::LineTooLong),
				_ => Self::Trailer(length + 1),
			},

			Self::FinalLF => match b {
				b'\n' => Self::Done,
				_ => return Err(BadChunkHeader::Newline),
			},

			// Not framing states; the reader never feeds bytes here.
			Self::Data(_) | Self::Done => self,
		})
	}
}

/// Decodes a hex digit.
fn hex_value(b: u8) -> Option<u64> {
	char::from(b).to_digit(16).map(u64::from)
}

/// The framing state of a response body that is encoded using chunked transfer coding.
///
/// Trailer fields are read and discarded.
#[derive(Debug)]
pub(super) struct Receive {
	/// The current state.
	state: State,
}

impl Receive {
	/// Constructs a new `Receive`.
	pub(super) fn new() -> Self {
		Self {
			state: State::SizeFirst,
		}
	}

	/// Returns whether the entire response body, including the trailer section, has been received.
	pub(super) fn is_complete(&self) -> bool {
		self.state == State::Done
	}

	/// Reads body bytes from `socket`, consuming chunk framing as it goes.
	pub(super) fn poll_read<Socket: AsyncBufRead + ?Sized>(
		&mut self,
		mut socket: Pin<&mut Socket>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		loop {
			match self.state {
				State::Done => return Ok(0).into(),
				State::Data(remaining) => {
					let available = ready!(socket.as_mut().poll_fill_buf(cx))?;
					if available.is_empty() {
						return Err(std::io::ErrorKind::UnexpectedEof.into()).into();
					}
					let to_read = std::cmp::min(
						std::cmp::min(buf.len(), available.len()) as u64,
						remaining.get(),
					) as usize;
					buf[..to_read].copy_from_slice(&available[..to_read]);
					socket.as_mut().consume(to_read);
					self.state = NonZeroU64::new(remaining.get() - to_read as u64)
						.map_or(State::DataCR, State::Data);
					return Ok(to_read).into();
				}
				state => {
					let b = ready!(poll_byte(socket.as_mut(), cx))?;
					self.state = state.advance(b)?;
				}
			}
		}
	}
}

/// Reads and returns one byte from the socket.
fn poll_byte<Socket: AsyncBufRead + ?Sized>(
	mut socket: Pin<&mut Socket>,
	cx: &mut Context<'_>,
) -> Poll<Result<u8>> {
	let first = ready!(socket.as_mut().poll_fill_buf(cx))?.first().copied();
	match first {
		Some(b) => {
			socket.consume(1);
			Ok(b).into()
		}
		None => Err(std::io::ErrorKind::UnexpectedEof.into()).into(),
	}
}
