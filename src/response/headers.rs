use crate::error::{BadContentLength, MalformedResponse};
use crate::request::Metadata;
use crate::response::body::Framing;
use crate::util::header_tokens;
use crate::util::io::AsyncBufReadExt as _;
use futures_io::AsyncBufRead;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use std::io::Result;
use std::pin::Pin;

/// The largest status line plus header section accepted.
const MAX_HEAD_LENGTH: usize = 64 * 1024;

/// The largest number of response header fields accepted.
const MAX_HEADERS: usize = 128;

/// An HTTP status line and response headers, along with how the body that follows is framed.
#[derive(Debug)]
pub(crate) struct Head {
	/// The HTTP minor version number.
	///
	/// For example, for HTTP/1.0, this is zero; for HTTP/1.1, this is 1.
	pub(crate) minor_version: u8,

	/// The status code.
	pub(crate) status: u16,

	/// The reason phrase.
	pub(crate) reason: String,

	/// The response headers, in the order received.
	pub(crate) headers: HeaderMap,

	/// How the body is delimited.
	pub(crate) framing: Framing,

	/// Whether the connection can be reused once the body has been read.
	pub(crate) persistent: bool,
}

/// Receives an HTTP status line and response headers.
///
/// The `socket` parameter is the transport-layer socket over which the HTTP response will be
/// received. Exactly the head is consumed from it, leaving the socket positioned at the start of
/// the body. The `metadata` parameter is the value returned when the request head was sent.
///
/// Informational (1xx) responses are skipped.
///
/// # Errors
/// This function returns an error if reading from `socket` fails, or of kind
/// [`UnexpectedEof`](std::io::ErrorKind::UnexpectedEof) if the connection closes before the head
/// is complete.
///
/// This function returns an error of kind [`InvalidData`](std::io::ErrorKind::InvalidData) under
/// the following conditions:
/// * if the response status line or headers are malformed
/// * if the response head exceeds 64 KiB or 128 header fields
/// * if a header cannot be represented in a [`HeaderMap`]
/// * if the server sent a status code 101 Switching Protocols
/// * if multiple, differing `Content-Length` values are present
/// * if the value of the `Content-Length` header is not a nonnegative integer that fits in a
///   `u64`
/// * if the `Content-Length` and `Transfer-Encoding` headers are both present
/// * if the `Transfer-Encoding` header indicates a coding other than chunked
pub(crate) async fn receive<Socket: AsyncBufRead + ?Sized>(
	mut socket: Pin<&mut Socket>,
	metadata: Metadata,
) -> Result<Head> {
	let mut buffer: Vec<u8> = Vec::new();
	let (minor_version, status, reason, headers) = loop {
		buffer.clear();
		loop {
			// Copy bytes into the buffer until it holds a complete head. Only the head is
			// consumed from the socket; any body bytes stay there for the body reader.
			let head_done = socket
				.as_mut()
				.read_buf(|bytes: &[u8]| -> (usize, Result<bool>) {
					if bytes.is_empty() {
						return (0, Err(std::io::ErrorKind::UnexpectedEof.into()));
					}
					let before = buffer.len();
					let take = std::cmp::min(bytes.len(), MAX_HEAD_LENGTH - before);
					buffer.extend_from_slice(&bytes[..take]);
					if let Some(n) = headers_length(&buffer) {
						buffer.truncate(n);
						(n - before, Ok(true))
					} else {
						(take, Ok(false))
					}
				})
				.await??;
			if head_done {
				break;
			}
			if buffer.len() == MAX_HEAD_LENGTH {
				return Err(MalformedResponse::ResponseHeadersTooLong.into());
			}
		}

		let parsed = parse(&buffer)?;
		match parsed.1 {
			101 => return Err(MalformedResponse::SwitchingProtocols.into()),
			100..=199 => {
				tracing::trace!(status = parsed.1, "skipping informational response");
			}
			_ => break parsed,
		}
	};
	tracing::trace!(bytes = buffer.len(), status, "received response head");

	let content_length = get_content_length(&headers)?;
	let chunked = is_chunked(&headers)?;

	// A server MUST NOT send a Content-Length header field in any message that contains a
	// Transfer-Encoding header field.
	if content_length.is_some() && chunked {
		return Err(MalformedResponse::ContentLengthAndTransferEncoding.into());
	}

	// See whether the connection can persist. A body of indeterminate length is handled by the
	// body reader.
	let persistent = minor_version == 1
		&& !metadata.connection_close
		&& !crate::util::is_connection_close(&headers);

	// Follow the rules to determine response body length.
	let framing = if metadata.head || status == 204 || status == 304 {
		// 1. Any response to a HEAD request and any response with a 1xx (Informational), 204
		// (No Content), or 304 (Not Modified) status code is always terminated by the first
		// empty line after the header fields, regardless of the header fields present in the
		// message, and thus cannot contain a message body.
		Framing::Fixed(0)
	// Rule 2 is not applicable: CONNECT is not supported.
	} else if chunked {
		// 3. If a Transfer-Encoding header field is present and the chunked transfer coding is the
		// final encoding, the message body length is determined by reading and decoding the
		// chunked data until the transfer coding indicates the data is complete.
		Framing::Chunked
	// Rule 4 is handled in get_content_length() and is_chunked().
	} else if let Some(n) = content_length {
		// 5. If a valid Content-Length header field is present without Transfer-Encoding, its
		// decimal value defines the expected message body length in octets.
		Framing::Fixed(n)
	// Rule 6 is not applicable: this is not a request message.
	} else {
		// 7. Otherwise, this is a response message without a declared message body length, so
		// the message body length is determined by the number of octets received prior to the
		// server closing the connection.
		Framing::Eof
	};

	Ok(Head {
		minor_version,
		status,
		reason,
		headers,
		framing,
		persistent,
	})
}

/// Parses a complete response head into owned values.
fn parse(buffer: &[u8]) -> Result<(u8, u16, String, HeaderMap)> {
	let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
	let mut resp = httparse::Response::new(&mut storage);
	match resp.parse(buffer).map_err(MalformedResponse::from)? {
		httparse::Status::Complete(n) if n == buffer.len() => (),
		_ => {
			// We thought the head was complete, but httparse disagrees about where it ends. This
			// is almost certainly due to incorrect newlines.
			return Err(MalformedResponse::from(httparse::Error::NewLine).into());
		}
	}
	let (Some(minor_version), Some(status)) = (resp.version, resp.code) else {
		return Err(MalformedResponse::from(httparse::Error::Status).into());
	};
	let reason = resp.reason.unwrap_or_default().to_owned();
	let mut headers = HeaderMap::with_capacity(resp.headers.len());
	for header in resp.headers.iter() {
		let name = HeaderName::from_bytes(header.name.as_bytes())
			.map_err(|_| MalformedResponse::BadHeader)?;
		let value =
			HeaderValue::from_bytes(header.value).map_err(|_| MalformedResponse::BadHeader)?;
		let _ = headers.append(name, value);
	}
	Ok((minor_version, status, reason, headers))
}

/// Scans the headers and decodes the `Content-Length` header, if any.
///
/// If the `Content-Length` header appears and contains a valid number, returns `Ok(Some(n))` where
/// `n` is that number. Repeated identical values are accepted. If there is no `Content-Length`
/// header, returns `Ok(None)`.
///
/// # Errors
/// This function returns an error of kind [`InvalidData`](std::io::ErrorKind::InvalidData) under
/// the following conditions:
/// * if multiple, differing `Content-Length` values are present
/// * if a value is not a nonnegative integer
/// * if a value is too large to represent in a `u64`
fn get_content_length(headers: &HeaderMap) -> Result<Option<u64>> {
	let mut ret = None;
	for value in header_tokens(headers, CONTENT_LENGTH) {
		let value = std::str::from_utf8(value).map_err(BadContentLength::NotUtf8)?;
		let value = value.parse::<u64>().map_err(BadContentLength::NotU64)?;
		match ret {
			Some(existing) if existing != value => {
				return Err(MalformedResponse::MultipleContentLengths.into());
			}
			_ => ret = Some(value),
		}
	}
	Ok(ret)
}

/// Scans the buffer and determines the length of the HTTP head.
///
/// If the whole head has been received, returns `Some(n)` where `n` is the length of the head in
/// bytes, including the final [CR]LF[CR]LF. If not, returns `None`.
fn headers_length(buffer: &[u8]) -> Option<usize> {
	// Search for [CR]LF[CR]LF. The position() function returns how many elements it consumed
	// in *that particular call* prior to the found element; thus, if called more than once on
	// the same iterator (i.e. to find subsequent occurrences of the item), it returns
	// incremental, not cumulative, distances.
	let mut start_pos = 0;
	let mut iter = buffer.iter();
	while let Some(dist) = iter.position(|&b| b == b'\n' || b == b'\r') {
		let eol_pos = start_pos + dist;
		for &candidate in &[
			&b"\r\n\r\n"[..],
			&b"\r\n\n"[..],
			&b"\n\r\n"[..],
			&b"\n\n"[..],
		] {
			if buffer[eol_pos..].starts_with(candidate) {
				return Some(eol_pos + candidate.len());
			}
		}
		// This one was not it. We have consumed eol_pos + 1 elements.
		start_pos = eol_pos + 1;
	}
	None
}

/// Scans the headers and determines whether the body uses chunked transfer coding.
///
/// # Errors
/// This function returns an error of kind [`InvalidData`](std::io::ErrorKind::InvalidData) if the
/// `Transfer-Encoding` header lists any coding other than a single `chunked`.
fn is_chunked(headers: &HeaderMap) -> Result<bool> {
	let mut ret = false;
	for coding in header_tokens(headers, TRANSFER_ENCODING) {
		if ret || !coding.eq_ignore_ascii_case(b"chunked") {
			return Err(MalformedResponse::NotChunked.into());
		}
		ret = true;
	}
	Ok(ret)
}
