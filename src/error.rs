//! Errors reported by `httpfetch`.
//!
//! Every public operation reports failure as a [`FetchError`]. A `FetchError` carries a
//! human-readable message, an [`ErrorKind`] classifying the failure, and optionally the
//! underlying error that caused it.
//!
//! Failures below the fetch layer—the socket, the HTTP/1.1 framing of the response, and the
//! content decoders—are reported internally as [`std::io::Error`]. Errors passed up from the
//! socket pass through unmodified. Errors caused by the server sending an invalid or unsupported
//! HTTP response are reported as [`std::io::ErrorKind::InvalidData`] whose inner error is a
//! [`MalformedResponse`]. When such an error reaches the fetch layer it becomes a `FetchError` of
//! kind [`ErrorKind::System`] whose source is the original `io::Error`.

use std::fmt::{Display, Formatter};

/// The category of a [`FetchError`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
	/// The request could not be constructed: a GET or HEAD request with a body, a URL that is
	/// not absolute, an unsupported scheme, an invalid method or header, or a body that was
	/// already consumed.
	InvalidInput,

	/// The transport failed: DNS resolution, connection refusal, a reset, a malformed response,
	/// an unreadable local file, or a body that could not be decoded.
	System,

	/// The request timeout expired before the response headers arrived.
	RequestTimeout,

	/// The request timeout expired while the response body was being read.
	BodyTimeout,

	/// A redirect was received while the redirect mode was [`Error`](crate::RedirectMode::Error).
	NoRedirect,

	/// The redirect counter reached the configured maximum.
	MaxRedirect,

	/// A redirect status was received without a usable `Location` header.
	InvalidRedirect,

	/// A redirect would require replaying a request body that was a one-shot stream.
	UnsupportedRedirect,

	/// The response body exceeded the configured size limit.
	MaxSize,

	/// The body could not be parsed as JSON.
	InvalidJson,
}

impl ErrorKind {
	/// Returns the conventional lowercase, hyphenated name of the kind, e.g. `max-redirect`.
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			Self::InvalidInput => "invalid-input",
			Self::System => "system",
			Self::RequestTimeout => "request-timeout",
			Self::BodyTimeout => "body-timeout",
			Self::NoRedirect => "no-redirect",
			Self::MaxRedirect => "max-redirect",
			Self::InvalidRedirect => "invalid-redirect",
			Self::UnsupportedRedirect => "unsupported-redirect",
			Self::MaxSize => "max-size",
			Self::InvalidJson => "invalid-json",
		}
	}
}

impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		f.write_str(self.as_str())
	}
}

/// The boxed error type carried as the cause of a [`FetchError`].
type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error that occurred while building, issuing, or reading the result of a fetch.
#[derive(Debug)]
pub struct FetchError {
	/// The category of failure.
	kind: ErrorKind,

	/// The human-readable description.
	message: String,

	/// The underlying error, if any.
	cause: Option<Cause>,
}

impl FetchError {
	/// Constructs a new `FetchError` with no underlying cause.
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			cause: None,
		}
	}

	/// Constructs a new `FetchError` caused by another error.
	pub fn with_cause(
		kind: ErrorKind,
		message: impl Into<String>,
		cause: impl Into<Cause>,
	) -> Self {
		Self {
			kind,
			message: message.into(),
			cause: Some(cause.into()),
		}
	}

	/// Shorthand for an [`ErrorKind::InvalidInput`] error.
	pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::InvalidInput, message)
	}

	/// Wraps an I/O error unchanged: the message is the error’s own message and the error becomes
	/// the cause.
	pub(crate) fn io(e: std::io::Error) -> Self {
		Self::with_cause(ErrorKind::System, e.to_string(), e)
	}

	/// Returns the category of the error.
	#[must_use]
	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	/// Returns the human-readable description of the error.
	#[must_use]
	pub fn message(&self) -> &str {
		&self.message
	}

	/// Returns the underlying error, if any.
	#[must_use]
	pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
		self.cause.as_deref()
	}
}

impl Display for FetchError {
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		f.write_str(&self.message)
	}
}

impl std::error::Error for FetchError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self.cause {
			Some(ref cause) => Some(cause.as_ref()),
			None => None,
		}
	}
}

impl From<http::Error> for FetchError {
	fn from(inner: http::Error) -> Self {
		Self::with_cause(ErrorKind::InvalidInput, inner.to_string(), inner)
	}
}

impl From<url::ParseError> for FetchError {
	fn from(inner: url::ParseError) -> Self {
		Self::with_cause(
			ErrorKind::InvalidInput,
			format!("Invalid URL: {inner}"),
			inner,
		)
	}
}

/// The ways in which a received `Content-Length` header can be invalid.
#[derive(Debug, PartialEq)]
pub enum BadContentLength {
	/// The header is not valid UTF-8.
	NotUtf8(std::str::Utf8Error),

	/// The header is not a nonnegative integer or does not fit into a `u64`.
	NotU64(<u64 as std::str::FromStr>::Err),
}

impl Display for BadContentLength {
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		match self {
			Self::NotUtf8(inner) => inner.fmt(f),
			Self::NotU64(inner) => inner.fmt(f),
		}
	}
}

impl std::error::Error for BadContentLength {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::NotUtf8(inner) => Some(inner),
			Self::NotU64(inner) => Some(inner),
		}
	}
}

/// The ways in which the chunked framing of a response body can be invalid.
#[derive(Debug, Eq, PartialEq)]
pub enum BadChunkHeader {
	/// The chunk size is missing or contains a byte that is not a hex digit.
	SizeNotHex,

	/// The size does not fit in a `u64`.
	SizeNotU64,

	/// A chunk header, chunk trailer, or trailer field line is longer than permitted.
	LineTooLong,

	/// Chunk data was not followed by a line break.
	Newline,
}

impl Display for BadChunkHeader {
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		match self {
			Self::SizeNotHex => write!(f, "Chunk size is not a hex number"),
			Self::SizeNotU64 => write!(f, "Chunk size is too large"),
			Self::LineTooLong => write!(f, "Chunk framing line is too long"),
			Self::Newline => write!(f, "Chunk data is not followed by a newline"),
		}
	}
}

impl std::error::Error for BadChunkHeader {}

/// The nested error included in any [`InvalidData`](std::io::ErrorKind::InvalidData) I/O error
/// that originates in the response reader.
#[derive(Debug, PartialEq)]
pub enum MalformedResponse {
	/// An error occurred during parsing the status line or headers.
	ParseHeaders(httparse::Error),

	/// The status line and headers exceed the size the reader is willing to buffer.
	ResponseHeadersTooLong,

	/// A header name or value could not be represented in a header map.
	BadHeader,

	/// The server decided to switch protocols. This is not supported.
	SwitchingProtocols,

	/// The server sent both a `Content-Length` header and a `Transfer-Encoding` header.
	ContentLengthAndTransferEncoding,

	/// The server sent multiple, differing `Content-Length` headers.
	MultipleContentLengths,

	/// The server sent an invalid `Content-Length` header.
	BadContentLength(BadContentLength),

	/// The server sent a `Transfer-Encoding` whose final coding is not `chunked`.
	NotChunked,

	/// The server sent an invalid chunk header.
	BadChunkHeader(BadChunkHeader),
}

impl Display for MalformedResponse {
	fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
		match self {
			Self::ParseHeaders(inner) => write!(f, "Malformed response head: {inner}"),
			Self::ResponseHeadersTooLong => write!(f, "Response headers too long"),
			Self::BadHeader => write!(f, "Response header not representable"),
			Self::SwitchingProtocols => write!(f, "Unsupported 101 Switching Protocols received"),
			Self::ContentLengthAndTransferEncoding => {
				write!(f, "Content-Length and Transfer-Encoding both received")
			}
			Self::MultipleContentLengths => {
				write!(f, "Conflicting Content-Length headers received")
			}
			Self::BadContentLength(inner) => {
				write!(f, "Invalid Content-Length header received: {inner}")
			}
			Self::NotChunked => write!(f, "Unsupported Transfer-Encoding received"),
			Self::BadChunkHeader(inner) => write!(f, "Invalid chunk header received: {inner}"),
		}
	}
}

impl std::error::Error for MalformedResponse {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::ParseHeaders(inner) => Some(inner),
			Self::BadContentLength(inner) => Some(inner),
			Self::BadChunkHeader(inner) => Some(inner),
			Self::ResponseHeadersTooLong
			| Self::BadHeader
			| Self::SwitchingProtocols
			| Self::ContentLengthAndTransferEncoding
			| Self::MultipleContentLengths
			| Self::NotChunked => None,
		}
	}
}

impl From<httparse::Error> for MalformedResponse {
	fn from(inner: httparse::Error) -> Self {
		Self::ParseHeaders(inner)
	}
}

impl From<BadContentLength> for MalformedResponse {
	fn from(inner: BadContentLength) -> Self {
		Self::BadContentLength(inner)
	}
}

impl From<BadChunkHeader> for MalformedResponse {
	fn from(inner: BadChunkHeader) -> Self {
		Self::BadChunkHeader(inner)
	}
}

impl From<MalformedResponse> for std::io::Error {
	fn from(inner: MalformedResponse) -> Self {
		Self::new(std::io::ErrorKind::InvalidData, inner)
	}
}

impl From<BadContentLength> for std::io::Error {
	fn from(inner: BadContentLength) -> Self {
		Into::<MalformedResponse>::into(inner).into()
	}
}

impl From<BadChunkHeader> for std::io::Error {
	fn from(inner: BadChunkHeader) -> Self {
		Into::<MalformedResponse>::into(inner).into()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	/// Tests that the kind names match the conventional fetch error type strings.
	#[test]
	fn test_kind_names() {
		assert_eq!(ErrorKind::MaxRedirect.to_string(), "max-redirect");
		assert_eq!(ErrorKind::RequestTimeout.as_str(), "request-timeout");
		assert_eq!(ErrorKind::InvalidInput.as_str(), "invalid-input");
	}

	/// Tests that an I/O error is carried unchanged.
	#[test]
	fn test_io_passthrough() {
		let e = FetchError::io(std::io::Error::new(
			std::io::ErrorKind::NotFound,
			"no such thing",
		));
		assert_eq!(e.kind(), ErrorKind::System);
		assert_eq!(e.to_string(), "no such thing");
		let source = std::error::Error::source(&e).unwrap();
		let io = source.downcast_ref::<std::io::Error>().unwrap();
		assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
	}

	/// Tests that a malformed response becomes an `InvalidData` I/O error with a nested source.
	#[test]
	fn test_malformed_into_io() {
		let e: std::io::Error = BadChunkHeader::SizeNotHex.into();
		assert_eq!(e.kind(), std::io::ErrorKind::InvalidData);
		let inner = e.get_ref().unwrap().downcast_ref::<MalformedResponse>();
		assert_eq!(
			inner,
			Some(&MalformedResponse::BadChunkHeader(BadChunkHeader::SizeNotHex))
		);
	}
}
