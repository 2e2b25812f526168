use crate::request::body::Framing;
use crate::request::{Metadata, TransportOptions};
use crate::util::io::AsyncWriteExt as _;
use crate::util::{is_connection_close, is_request_target, is_token};
use futures_io::AsyncWrite;
use http::header::{CONTENT_LENGTH, HOST, TE, TRANSFER_ENCODING, UPGRADE};
use http::Method;
use std::pin::Pin;

/// Sends an HTTP request line and request headers.
///
/// The request line is built from the method and request target in `options`. A `Host` header is
/// sent first unless `options.headers` already contains one. The `framing` parameter selects how
/// the body will be delimited: for [`Framing::Chunked`] a `Transfer-Encoding: chunked` header is
/// added and any `Content-Length` header is left out; for [`Framing::Fixed`] the headers are sent
/// as given. A caller-supplied `Transfer-Encoding` header is never sent, since chunked is the only
/// transfer coding supported.
///
/// The head is assembled in memory and written with a single `write_all`, so the socket need not
/// provide write buffering. The socket is not flushed.
///
/// This function returns the metadata needed to interpret the response.
///
/// # Errors
/// This function returns an error if writing to `socket` fails.
///
/// # Panics
/// This function panics in a debug build if the method is `CONNECT` or not a token, if the
/// request target contains invalid characters, or if the `Upgrade` or `TE` header is present.
/// The request builder rules these out.
pub(crate) async fn send<Socket: AsyncWrite + ?Sized>(
	options: &TransportOptions,
	framing: Framing,
	mut socket: Pin<&mut Socket>,
) -> std::io::Result<Metadata> {
	let method = options.method.as_str();
	debug_assert!(is_token(method), "Request method {method} is not a token");
	debug_assert!(
		options.method != Method::CONNECT,
		"Request method CONNECT is not supported"
	);
	debug_assert!(
		is_request_target(&options.target),
		"Request target contains invalid characters"
	);
	debug_assert!(
		!options.headers.contains_key(UPGRADE),
		"Request header Upgrade is not supported"
	);
	debug_assert!(
		!options.headers.contains_key(TE),
		"Request header TE is not supported"
	);

	let mut head = Vec::with_capacity(256);
	head.extend_from_slice(method.as_bytes());
	head.push(b' ');
	head.extend_from_slice(options.target.as_bytes());
	head.extend_from_slice(b" HTTP/1.1\r\n");

	if !options.headers.contains_key(HOST) {
		push_field(&mut head, HOST.as_str(), options.host.as_bytes());
	}
	for (name, value) in &options.headers {
		if name == TRANSFER_ENCODING || (framing == Framing::Chunked && name == CONTENT_LENGTH) {
			continue;
		}
		push_field(&mut head, name.as_str(), value.as_bytes());
	}
	if framing == Framing::Chunked {
		push_field(&mut head, TRANSFER_ENCODING.as_str(), b"chunked");
	}
	head.extend_from_slice(b"\r\n");

	tracing::trace!(bytes = head.len(), target = %options.target, "sending request head");
	socket.as_mut().write_all(&head).await?;

	Ok(Metadata {
		head: options.method == Method::HEAD,
		connection_close: is_connection_close(&options.headers),
	})
}

/// Appends one header line.
fn push_field(head: &mut Vec<u8>, name: &str, value: &[u8]) {
	head.extend_from_slice(name.as_bytes());
	head.extend_from_slice(b": ");
	head.extend_from_slice(value);
	head.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::request::{Request, RequestInit};
	use futures_executor::block_on;

	fn options(init: RequestInit) -> TransportOptions {
		let request = Request::new("http://someplace.example.com:8080/abcd/efgh?x=1", init).unwrap();
		TransportOptions::new(&request).unwrap()
	}

	/// Tests sending a basic head, with the Host header added.
	#[test]
	fn test_basic() {
		let options = options(
			RequestInit::new()
				.header("user-agent", "Thingy/1.0")
				.header("accept", "*/*")
				.header("accept-encoding", "identity")
				.header("connection", "close"),
		);
		let mut sink: Vec<u8> = Vec::new();
		let metadata = block_on(send(&options, Framing::Fixed(0), Pin::new(&mut sink))).unwrap();
		assert_eq!(
			String::from_utf8(sink).unwrap(),
			"GET /abcd/efgh?x=1 HTTP/1.1\r\nhost: someplace.example.com:8080\r\nuser-agent: Thingy/1.0\r\naccept: */*\r\naccept-encoding: identity\r\nconnection: close\r\n\r\n"
		);
		assert!(metadata.connection_close);
		assert!(!metadata.head);
	}

	/// Tests that a chunked body replaces Content-Length with Transfer-Encoding.
	#[test]
	fn test_chunked() {
		let mut options = options(RequestInit::new().method("POST"));
		options.headers.clear();
		let _ = options
			.headers
			.insert(CONTENT_LENGTH, http::HeaderValue::from_static("10"));
		let _ = options
			.headers
			.insert(TRANSFER_ENCODING, http::HeaderValue::from_static("gzip"));
		let mut sink: Vec<u8> = Vec::new();
		let metadata = block_on(send(&options, Framing::Chunked, Pin::new(&mut sink))).unwrap();
		assert_eq!(
			String::from_utf8(sink).unwrap(),
			"POST /abcd/efgh?x=1 HTTP/1.1\r\nhost: someplace.example.com:8080\r\ntransfer-encoding: chunked\r\n\r\n"
		);
		assert!(!metadata.connection_close);
	}

	/// Tests that an explicit Host header is not duplicated and HEAD is recorded.
	#[test]
	fn test_explicit_host_and_head() {
		let mut options = options(RequestInit::new().method("HEAD"));
		options.headers.clear();
		let _ = options
			.headers
			.insert(HOST, http::HeaderValue::from_static("virtual.example.com"));
		let mut sink: Vec<u8> = Vec::new();
		let metadata = block_on(send(&options, Framing::Fixed(0), Pin::new(&mut sink))).unwrap();
		assert_eq!(
			String::from_utf8(sink).unwrap(),
			"HEAD /abcd/efgh?x=1 HTTP/1.1\r\nhost: virtual.example.com\r\n\r\n"
		);
		assert!(metadata.head);
	}
}
