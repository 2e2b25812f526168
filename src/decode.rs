//! Removal of the `gzip` and `deflate` content codings from response bodies.

use crate::body::BoxRead;
use futures_core::ready;
use futures_io::AsyncRead;
use http::header::{HeaderMap, CONTENT_ENCODING};
use http::Method;
use std::io::{Result, Write as _};
use std::pin::Pin;
use std::task::{Context, Poll};

/// The number of compressed bytes read from the source at a time.
const INPUT_CHUNK: usize = 8 * 1024;

/// What the decoder needs to know about the exchange a body came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodeContext {
	/// The request method.
	pub method: Method,

	/// Whether decompression is enabled.
	pub compress: bool,

	/// The response status code.
	pub status: u16,
}

/// Wraps a raw response body in the decoder its `Content-Encoding` calls for.
///
/// The body is returned unmodified if decompression is disabled, the request was `HEAD`, the
/// status is 204 or 304, or the coding is absent or unrecognized. Codings are matched exactly and
/// case-sensitively: `gzip` and `x-gzip` are gunzipped, while `deflate` and `x-deflate` are
/// inflated as either zlib-wrapped or raw deflate data depending on the first byte.
///
/// Decoding happens as the returned stream is read, and errors in the compressed data surface
/// there. A gzip or deflate stream cut off before its end delivers what was decoded without
/// error.
///
/// # Errors
/// None at present; the result leaves room for codings whose setup can fail.
pub fn decode(headers: &HeaderMap, raw: BoxRead, context: &DecodeContext) -> Result<BoxRead> {
	if !context.compress
		|| context.method == Method::HEAD
		|| context.status == 204
		|| context.status == 304
	{
		return Ok(raw);
	}
	let Some(coding) = headers.get(CONTENT_ENCODING) else {
		return Ok(raw);
	};
	let kind = match coding.as_bytes() {
		b"gzip" | b"x-gzip" => Kind::Gzip,
		b"deflate" | b"x-deflate" => Kind::Deflate,
		_ => return Ok(raw),
	};
	tracing::trace!(?kind, "decoding response body");
	Ok(Box::pin(Inflate::new(raw, kind)))
}

/// A recognized content coding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Kind {
	Gzip,
	Deflate,
}

/// A push-mode decompressor that writes into a buffer.
enum Decoder {
	Gzip(flate2::write::GzDecoder<Vec<u8>>),
	Zlib(flate2::write::ZlibDecoder<Vec<u8>>),
	Raw(flate2::write::DeflateDecoder<Vec<u8>>),
}

impl Decoder {
	/// Picks the decompressor for a coding given the first byte of compressed data.
	fn new(kind: Kind, first: u8) -> Self {
		match kind {
			Kind::Gzip => Self::Gzip(flate2::write::GzDecoder::new(Vec::new())),
			// A zlib header starts with CM = 8 in the low nybble.
			Kind::Deflate if first & 0x0F == 0x08 => {
				Self::Zlib(flate2::write::ZlibDecoder::new(Vec::new()))
			}
			Kind::Deflate => Self::Raw(flate2::write::DeflateDecoder::new(Vec::new())),
		}
	}

	/// Returns the decompressed output not yet handed out.
	fn output(&mut self) -> &mut Vec<u8> {
		match self {
			Self::Gzip(d) => d.get_mut(),
			Self::Zlib(d) => d.get_mut(),
			Self::Raw(d) => d.get_mut(),
		}
	}

	/// Decompresses a chunk of input into the output buffer.
	///
	/// Input after the end of the compressed stream is ignored.
	fn feed(&mut self, mut data: &[u8]) -> Result<()> {
		while !data.is_empty() {
			let consumed = match self {
				Self::Gzip(d) => d.write(data)?,
				Self::Zlib(d) => d.write(data)?,
				Self::Raw(d) => d.write(data)?,
			};
			if consumed == 0 {
				break;
			}
			data = &data[consumed..];
		}
		match self {
			Self::Gzip(d) => d.flush(),
			Self::Zlib(d) => d.flush(),
			Self::Raw(d) => d.flush(),
		}
	}

	/// Flushes whatever remains at the end of input.
	fn finish(&mut self) -> Result<()> {
		match self {
			Self::Gzip(d) => d.try_finish(),
			Self::Zlib(d) => d.try_finish(),
			Self::Raw(d) => d.try_finish(),
		}
	}
}

/// A body stream with a compression coding removed.
struct Inflate {
	/// The compressed stream.
	source: BoxRead,

	/// The coding being removed.
	kind: Kind,

	/// The decompressor, created once the first compressed bytes arrive.
	decoder: Option<Decoder>,

	/// The read buffer for compressed bytes.
	input: Vec<u8>,

	/// How much of the decompressor’s output has been handed out.
	delivered: usize,

	/// Whether the compressed stream has ended.
	done: bool,
}

impl Inflate {
	fn new(source: BoxRead, kind: Kind) -> Self {
		Self {
			source,
			kind,
			decoder: None,
			input: vec![0_u8; INPUT_CHUNK],
			delivered: 0,
			done: false,
		}
	}
}

impl AsyncRead for Inflate {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut [u8],
	) -> Poll<Result<usize>> {
		let this = self.get_mut();
		if buf.is_empty() {
			return Ok(0).into();
		}
		loop {
			if let Some(ref mut decoder) = this.decoder {
				let output = decoder.output();
				if this.delivered < output.len() {
					let n = std::cmp::min(buf.len(), output.len() - this.delivered);
					buf[..n].copy_from_slice(&output[this.delivered..this.delivered + n]);
					this.delivered += n;
					if this.delivered == output.len() {
						output.clear();
						this.delivered = 0;
					}
					return Ok(n).into();
				}
			}
			if this.done {
				return Ok(0).into();
			}
			let bytes_read = ready!(this.source.as_mut().poll_read(cx, &mut this.input))?;
			if bytes_read == 0 {
				this.done = true;
				if let Some(ref mut decoder) = this.decoder {
					if let Err(e) = decoder.finish() {
						// Servers commonly cut compressed bodies short; keep what was decoded.
						tracing::debug!(error = %e, "compressed body ended early");
					}
				}
				continue;
			}
			let chunk = &this.input[..bytes_read];
			this.decoder
				.get_or_insert_with(|| Decoder::new(this.kind, chunk[0]))
				.feed(chunk)?;
		}
	}
}
