mod tee;

use crate::error::{ErrorKind, FetchError};
use crate::util::io::AsyncReadExt as _;
use bytes::{Bytes, BytesMut};
use futures_io::AsyncRead;
use futures_util::io::Cursor;
use http::HeaderValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use url::Url;

/// A boxed, sendable byte stream.
pub type BoxRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// The size of the buffer used when draining a streamed body.
const READ_CHUNK: usize = 16 * 1024;

/// Where the content of a body comes from.
enum Source {
	/// The content is held in memory and can be replayed any number of times.
	Buffer(Bytes),

	/// The content is a one-shot stream.
	///
	/// The reader is taken out of the slot when the stream is handed to a consumer. The slot is
	/// behind a mutex so that a shared reference to the body is enough to tee it.
	Stream {
		reader: Mutex<Option<BoxRead>>,
		length: Option<u64>,
	},
}

/// The content of a request or response.
///
/// A body yields its content at most once, through one of [`HasBody::bytes`],
/// [`HasBody::text`], or [`HasBody::reader`]; after that, [`is_used`](Body::is_used) returns
/// `true` and further attempts fail. A body can be duplicated before it is used with
/// [`try_clone`](Body::try_clone).
pub struct Body {
	/// The content.
	source: Source,

	/// Whether the content has been handed to a consumer.
	used: bool,

	/// The media type the body declares for itself, used when a request has no explicit
	/// `Content-Type` header.
	mime: Option<HeaderValue>,
}

impl Body {
	/// Constructs an empty body.
	#[must_use]
	pub fn empty() -> Self {
		Bytes::new().into()
	}

	/// Constructs a body that streams its content from a reader.
	///
	/// The `length` parameter is the total number of bytes the reader will produce, if known in
	/// advance. A request body of unknown length is sent with chunked transfer coding.
	pub fn from_reader(reader: impl AsyncRead + Send + 'static, length: Option<u64>) -> Self {
		Self::from_boxed_reader(Box::pin(reader), length)
	}

	pub(crate) fn from_boxed_reader(reader: BoxRead, length: Option<u64>) -> Self {
		Self {
			source: Source::Stream {
				reader: Mutex::new(Some(reader)),
				length,
			},
			used: false,
			mime: None,
		}
	}

	/// Declares the media type of the body, as a blob would.
	#[must_use]
	pub fn with_mime(mut self, mime: HeaderValue) -> Self {
		self.mime = Some(mime);
		self
	}

	/// Returns the media type the body declares, if any.
	#[must_use]
	pub fn mime(&self) -> Option<&HeaderValue> {
		self.mime.as_ref()
	}

	/// Returns the total size of the body in bytes, if it can be determined without reading it.
	#[must_use]
	pub fn total_bytes(&self) -> Option<u64> {
		match self.source {
			Source::Buffer(ref bytes) => Some(bytes.len() as u64),
			Source::Stream { length, .. } => length,
		}
	}

	/// Returns whether the content has already been handed to a consumer.
	#[must_use]
	pub fn is_used(&self) -> bool {
		self.used
	}

	/// Returns the content if it is held in memory.
	#[must_use]
	pub fn as_bytes(&self) -> Option<&[u8]> {
		match self.source {
			Source::Buffer(ref bytes) => Some(bytes),
			Source::Stream { .. } => None,
		}
	}

	/// Produces an independently consumable copy of the body.
	///
	/// An in-memory body is shared. A streamed body is split so that both this body and the copy
	/// see every byte of the stream; whatever one side reads ahead of the other is buffered.
	///
	/// # Errors
	/// This function returns an error of kind [`InvalidInput`](ErrorKind::InvalidInput) if the
	/// body has already been used.
	pub fn try_clone(&self) -> Result<Self, FetchError> {
		if self.used {
			return Err(FetchError::invalid_input(
				"cannot clone body after it is used",
			));
		}
		let source = match self.source {
			Source::Buffer(ref bytes) => Source::Buffer(bytes.clone()),
			Source::Stream { ref reader, length } => {
				let mut slot = reader.lock().unwrap_or_else(PoisonError::into_inner);
				let original = slot.take().ok_or_else(|| {
					FetchError::invalid_input("cannot clone body after it is used")
				})?;
				let (left, right) = tee::tee(original);
				*slot = Some(Box::pin(left));
				Source::Stream {
					reader: Mutex::new(Some(Box::pin(right))),
					length,
				}
			}
		};
		Ok(Self {
			source,
			used: false,
			mime: self.mime.clone(),
		})
	}

	/// Takes the content for transmission as a request body.
	///
	/// An in-memory body stays replayable, so that it can be sent again after a redirect. A
	/// streamed body is used up. Returns `None` if a streamed body was already taken.
	pub(crate) fn payload(&mut self) -> Option<Payload> {
		match self.source {
			Source::Buffer(ref bytes) => Some(Payload::Buffer(bytes.clone())),
			Source::Stream {
				ref mut reader,
				length,
			} => {
				let reader = reader
					.get_mut()
					.unwrap_or_else(PoisonError::into_inner)
					.take()?;
				self.used = true;
				Some(Payload::Stream(reader, length))
			}
		}
	}

	/// Marks the body used and returns its content as a stream.
	fn take_reader(&mut self, url: &Url) -> Result<BoxRead, FetchError> {
		if self.used {
			return Err(used_error(url));
		}
		self.used = true;
		match self.source {
			Source::Buffer(ref bytes) => Ok(Box::pin(Cursor::new(bytes.clone()))),
			Source::Stream { ref mut reader, .. } => reader
				.get_mut()
				.unwrap_or_else(PoisonError::into_inner)
				.take()
				.ok_or_else(|| used_error(url)),
		}
	}

	/// Reads the whole body into memory, enforcing the size limit and timeout.
	async fn consume(&mut self, url: &Url, limits: BodyLimits) -> Result<Bytes, FetchError> {
		if self.used {
			return Err(used_error(url));
		}
		if let Source::Buffer(ref bytes) = self.source {
			// In-memory content is already complete; there is nothing to limit or time out.
			self.used = true;
			return Ok(bytes.clone());
		}
		let reader = self.take_reader(url)?;
		let collect = collect(reader, url, limits.size);
		match limits.timeout {
			None => collect.await,
			Some(timeout) => tokio::time::timeout(timeout, collect)
				.await
				.unwrap_or_else(|_| {
					tracing::debug!(%url, ?timeout, "body timeout");
					Err(FetchError::new(
						ErrorKind::BodyTimeout,
						format!(
							"Response timeout while trying to fetch {url} (over {}ms)",
							timeout.as_millis()
						),
					))
				}),
		}
	}
}

/// Drains a stream into memory.
async fn collect(mut reader: BoxRead, url: &Url, size: Option<u64>) -> Result<Bytes, FetchError> {
	let mut accumulated = BytesMut::new();
	let mut chunk = vec![0_u8; READ_CHUNK];
	loop {
		let bytes_read = reader.as_mut().read(&mut chunk).await.map_err(|e| {
			FetchError::with_cause(
				ErrorKind::System,
				format!("Invalid response body while trying to fetch {url}: {e}"),
				e,
			)
		})?;
		if bytes_read == 0 {
			return Ok(accumulated.freeze());
		}
		if let Some(size) = size {
			if accumulated.len() as u64 + bytes_read as u64 > size {
				return Err(FetchError::new(
					ErrorKind::MaxSize,
					format!("content size at {url} over limit: {size}"),
				));
			}
		}
		accumulated.extend_from_slice(&chunk[..bytes_read]);
	}
}

fn used_error(url: &Url) -> FetchError {
	FetchError::invalid_input(format!("body used already for: {url}"))
}

impl Default for Body {
	fn default() -> Self {
		Self::empty()
	}
}

impl std::fmt::Debug for Body {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut s = f.debug_struct("Body");
		match self.source {
			Source::Buffer(ref bytes) => s.field("buffer", &bytes.len()),
			Source::Stream { length, .. } => s.field("stream", &length),
		};
		s.field("used", &self.used).field("mime", &self.mime).finish()
	}
}

impl From<Bytes> for Body {
	fn from(bytes: Bytes) -> Self {
		Self {
			source: Source::Buffer(bytes),
			used: false,
			mime: None,
		}
	}
}

impl From<Vec<u8>> for Body {
	fn from(bytes: Vec<u8>) -> Self {
		Bytes::from(bytes).into()
	}
}

impl From<&'static [u8]> for Body {
	fn from(bytes: &'static [u8]) -> Self {
		Bytes::from_static(bytes).into()
	}
}

impl From<String> for Body {
	fn from(text: String) -> Self {
		Body::from(Bytes::from(text)).with_mime(HeaderValue::from_static(TEXT_PLAIN))
	}
}

impl From<&'static str> for Body {
	fn from(text: &'static str) -> Self {
		Body::from(Bytes::from_static(text.as_bytes()))
			.with_mime(HeaderValue::from_static(TEXT_PLAIN))
	}
}

/// The media type declared by textual bodies.
const TEXT_PLAIN: &str = "text/plain;charset=UTF-8";

/// Request body content ready for transmission.
pub(crate) enum Payload {
	Buffer(Bytes),
	Stream(BoxRead, Option<u64>),
}

/// The limits applied when a body is consumed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BodyLimits {
	/// The maximum number of bytes a streamed body may produce, or `None` for no limit.
	pub size: Option<u64>,

	/// The maximum time reading a streamed body may take, or `None` for no limit.
	pub timeout: Option<Duration>,
}

/// The capability of carrying a [`Body`], shared by [`Request`](crate::Request) and
/// [`Response`](crate::Response).
///
/// Implementors provide access to the body and to the context used when consuming it; the
/// consuming operations themselves are provided.
pub trait HasBody {
	/// Returns the body, or `None` if there is none.
	fn body(&self) -> Option<&Body>;

	/// Returns the body mutably, or `None` if there is none.
	fn body_mut(&mut self) -> Option<&mut Body>;

	/// Returns the URL that identifies the body in error messages.
	fn body_url(&self) -> &Url;

	/// Returns the limits applied when the body is consumed.
	fn body_limits(&self) -> BodyLimits;

	/// Returns whether the body has already been consumed.
	fn body_used(&self) -> bool {
		self.body().is_some_and(Body::is_used)
	}

	/// Reads the whole body into memory.
	///
	/// A missing body reads as empty.
	///
	/// # Errors
	/// This function returns an error of kind [`InvalidInput`](ErrorKind::InvalidInput) if the
	/// body was already consumed, [`MaxSize`](ErrorKind::MaxSize) if it exceeds the size limit,
	/// [`BodyTimeout`](ErrorKind::BodyTimeout) if reading it exceeds the timeout, or
	/// [`System`](ErrorKind::System) if the underlying stream fails.
	fn bytes(&mut self) -> impl Future<Output = Result<Bytes, FetchError>> + Send + '_ {
		let url = self.body_url().clone();
		let limits = self.body_limits();
		let body = self.body_mut();
		async move {
			match body {
				Some(body) => body.consume(&url, limits).await,
				None => Ok(Bytes::new()),
			}
		}
	}

	/// Reads the whole body into memory and decodes it as UTF-8, replacing invalid sequences.
	///
	/// # Errors
	/// This function fails under the same conditions as [`bytes`](HasBody::bytes).
	fn text(&mut self) -> impl Future<Output = Result<String, FetchError>> + Send + '_ {
		let bytes = self.bytes();
		async move {
			let bytes = bytes.await?;
			Ok(String::from_utf8_lossy(&bytes).into_owned())
		}
	}

	/// Reads the whole body into memory and parses it as JSON.
	///
	/// # Errors
	/// This function fails under the same conditions as [`bytes`](HasBody::bytes), and with an
	/// error of kind [`InvalidJson`](ErrorKind::InvalidJson) if the content is not valid JSON for
	/// `T`.
	#[cfg(feature = "json")]
	fn json<T: serde::de::DeserializeOwned>(
		&mut self,
	) -> impl Future<Output = Result<T, FetchError>> + Send + '_ {
		let url = self.body_url().clone();
		let bytes = self.bytes();
		async move {
			let bytes = bytes.await?;
			serde_json::from_slice(&bytes).map_err(|e| {
				FetchError::with_cause(
					ErrorKind::InvalidJson,
					format!("invalid json response body at {url} reason: {e}"),
					e,
				)
			})
		}
	}

	/// Takes the body as a stream, without applying the size limit or timeout.
	///
	/// A missing body yields an empty stream.
	///
	/// # Errors
	/// This function returns an error of kind [`InvalidInput`](ErrorKind::InvalidInput) if the
	/// body was already consumed.
	fn reader(&mut self) -> Result<BoxRead, FetchError> {
		let url = self.body_url().clone();
		match self.body_mut() {
			Some(body) => body.take_reader(&url),
			None => Ok(Box::pin(empty_reader())),
		}
	}
}

/// An empty stream.
fn empty_reader() -> Cursor<Bytes> {
	Cursor::new(Bytes::new())
}

#[cfg(test)]
mod test {
	use super::*;
	use futures_executor::block_on;

	/// A minimal body owner for exercising the provided methods.
	struct Holder {
		url: Url,
		body: Option<Body>,
		limits: BodyLimits,
	}

	impl Holder {
		fn new(body: Option<Body>) -> Self {
			Self {
				url: Url::parse("http://example.com/thing").unwrap(),
				body,
				limits: BodyLimits::default(),
			}
		}
	}

	impl HasBody for Holder {
		fn body(&self) -> Option<&Body> {
			self.body.as_ref()
		}

		fn body_mut(&mut self) -> Option<&mut Body> {
			self.body.as_mut()
		}

		fn body_url(&self) -> &Url {
			&self.url
		}

		fn body_limits(&self) -> BodyLimits {
			self.limits
		}
	}

	/// Tests that a body can only be consumed once.
	#[test]
	fn test_single_consumption() {
		block_on(async {
			let mut holder = Holder::new(Some(Body::from("Hello")));
			assert!(!holder.body_used());
			assert_eq!(holder.text().await.unwrap(), "Hello");
			assert!(holder.body_used());
			let e = holder.text().await.unwrap_err();
			assert_eq!(e.kind(), ErrorKind::InvalidInput);
			assert_eq!(
				e.to_string(),
				"body used already for: http://example.com/thing"
			);
		});
	}

	/// Tests that a missing body reads as empty.
	#[test]
	fn test_missing_body() {
		block_on(async {
			let mut holder = Holder::new(None);
			assert!(holder.bytes().await.unwrap().is_empty());
		});
	}

	/// Tests that a missing body yields an empty stream.
	#[test]
	fn test_missing_body_reader() {
		block_on(async {
			let mut holder = Holder::new(None);
			let mut reader = holder.reader().unwrap();
			let mut out = Vec::new();
			crate::util::io::read_to_end(reader.as_mut(), &mut out)
				.await
				.unwrap();
			assert!(out.is_empty());
		});
	}

	/// Tests the declared media types and sizes of the various sources.
	#[test]
	fn test_declared_metadata() {
		assert_eq!(
			Body::from("abc").mime().unwrap(),
			"text/plain;charset=UTF-8"
		);
		assert!(Body::from(vec![1_u8, 2, 3]).mime().is_none());
		assert_eq!(Body::from(vec![1_u8, 2, 3]).total_bytes(), Some(3));
		assert_eq!(Body::from_reader(&b"abc"[..], None).total_bytes(), None);
		assert_eq!(Body::from_reader(&b"abc"[..], Some(3)).total_bytes(), Some(3));
		assert_eq!(Body::empty().total_bytes(), Some(0));
	}

	/// Tests that a streamed body over the size limit fails.
	#[test]
	fn test_size_limit() {
		block_on(async {
			let mut holder = Holder::new(Some(Body::from_reader(&b"0123456789"[..], None)));
			holder.limits.size = Some(4);
			let e = holder.bytes().await.unwrap_err();
			assert_eq!(e.kind(), ErrorKind::MaxSize);
			assert_eq!(
				e.to_string(),
				"content size at http://example.com/thing over limit: 4"
			);
		});
	}

	/// Tests that a stream exactly at the size limit is accepted.
	#[test]
	fn test_size_limit_exact() {
		block_on(async {
			let mut holder = Holder::new(Some(Body::from_reader(&b"0123"[..], None)));
			holder.limits.size = Some(4);
			assert_eq!(&holder.bytes().await.unwrap()[..], b"0123");
		});
	}

	/// Tests that a failing stream surfaces as a system error.
	#[test]
	fn test_stream_failure() {
		struct Broken;
		impl AsyncRead for Broken {
			fn poll_read(
				self: Pin<&mut Self>,
				_cx: &mut std::task::Context<'_>,
				_buf: &mut [u8],
			) -> std::task::Poll<std::io::Result<usize>> {
				Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")).into()
			}
		}
		block_on(async {
			let mut holder = Holder::new(Some(Body::from_reader(Broken, None)));
			let e = holder.bytes().await.unwrap_err();
			assert_eq!(e.kind(), ErrorKind::System);
			assert_eq!(
				e.to_string(),
				"Invalid response body while trying to fetch http://example.com/thing: reset"
			);
		});
	}

	/// Tests cloning in-memory and streamed bodies.
	#[test]
	fn test_try_clone() {
		block_on(async {
			let original = Holder::new(Some(Body::from_reader(&b"stream data"[..], Some(11))));
			let mut copy = Holder::new(Some(original.body.as_ref().unwrap().try_clone().unwrap()));
			let mut original = original;
			assert_eq!(copy.text().await.unwrap(), "stream data");
			assert_eq!(original.text().await.unwrap(), "stream data");
			assert!(original.body.as_ref().unwrap().try_clone().is_err());

			let buffered = Body::from("buffered");
			let mut copy = Holder::new(Some(buffered.try_clone().unwrap()));
			assert_eq!(copy.text().await.unwrap(), "buffered");
			assert_eq!(buffered.as_bytes(), Some(&b"buffered"[..]));
		});
	}

	/// Tests taking a body as a stream.
	#[test]
	fn test_reader() {
		block_on(async {
			let mut holder = Holder::new(Some(Body::from("streamed")));
			let mut reader = holder.reader().unwrap();
			let mut out = Vec::new();
			crate::util::io::read_to_end(reader.as_mut(), &mut out)
				.await
				.unwrap();
			assert_eq!(out, b"streamed");
			assert!(holder.body_used());
			assert!(holder.reader().is_err());
		});
	}

	/// Tests that a streamed payload is used up while a buffered one stays replayable.
	#[test]
	fn test_payload() {
		let mut buffered = Body::from("again");
		assert!(matches!(buffered.payload(), Some(Payload::Buffer(_))));
		assert!(matches!(buffered.payload(), Some(Payload::Buffer(_))));
		assert!(!buffered.is_used());

		let mut streamed = Body::from_reader(&b"once"[..], Some(4));
		assert!(matches!(streamed.payload(), Some(Payload::Stream(_, Some(4)))));
		assert!(streamed.payload().is_none());
		assert!(streamed.is_used());
	}

	/// Tests parsing a body as JSON, and the error for invalid JSON.
	#[cfg(feature = "json")]
	#[test]
	fn test_json() {
		#[derive(Debug, PartialEq, serde::Deserialize)]
		struct Thing {
			name: String,
			count: u32,
		}
		block_on(async {
			let mut holder = Holder::new(Some(Body::from(r#"{"name":"x","count":3}"#)));
			let thing: Thing = holder.json().await.unwrap();
			assert_eq!(
				thing,
				Thing {
					name: "x".to_owned(),
					count: 3
				}
			);

			let mut holder = Holder::new(Some(Body::from("{")));
			let e = holder.json::<Thing>().await.unwrap_err();
			assert_eq!(e.kind(), ErrorKind::InvalidJson);
			assert!(e
				.message()
				.starts_with("invalid json response body at http://example.com/thing reason: "));
		});
	}
}
