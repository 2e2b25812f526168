use crate::body::HasBody as _;
use crate::error::FetchError;
use crate::request::Request;
use http::header::{
	HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONNECTION, CONTENT_LENGTH, USER_AGENT,
};
use http::Method;
use url::Url;

/// The `User-Agent` sent when the request does not name one.
const DEFAULT_USER_AGENT: &str = concat!(
	"httpfetch/",
	env!("CARGO_PKG_VERSION"),
	" (+https://github.com/httpfetch/httpfetch)"
);

/// Everything the transport needs to issue one request.
///
/// This is derived from a [`Request`] by filling in the default headers a fetch sends. The request
/// itself is not modified.
#[derive(Debug)]
pub struct TransportOptions {
	/// The request method.
	pub method: Method,

	/// The request URL.
	pub url: Url,

	/// Whether the scheme is `https`.
	pub secure: bool,

	/// The value of the `Host` header: the host name, followed by the port if it is not the
	/// scheme’s default.
	pub host: String,

	/// The port to connect to.
	pub port: u16,

	/// The request target: the path plus query, without the fragment.
	pub target: String,

	/// The headers to send, excluding `Host` and any framing header.
	pub headers: HeaderMap,
}

impl TransportOptions {
	/// Derives the transport options for a request.
	///
	/// # Errors
	/// This function returns an error of kind [`InvalidInput`](crate::ErrorKind::InvalidInput) if
	/// the URL has no host or its scheme is neither `http` nor `https`.
	pub fn new(request: &Request) -> Result<Self, FetchError> {
		let url = request.url();
		let Some(host_name) = url.host_str() else {
			return Err(FetchError::invalid_input("Only absolute URLs are supported"));
		};
		let secure = match url.scheme() {
			"http" => false,
			"https" => true,
			_ => {
				return Err(FetchError::invalid_input(
					"Only HTTP(S) protocols are supported",
				))
			}
		};
		let port = url.port_or_known_default().unwrap_or(if secure { 443 } else { 80 });
		let host = match url.port() {
			Some(explicit) => format!("{host_name}:{explicit}"),
			None => host_name.to_owned(),
		};
		let target = match url.query() {
			Some(query) => format!("{}?{query}", url.path()),
			None => url.path().to_owned(),
		};

		let mut headers = request.headers().clone();
		if !headers.contains_key(ACCEPT) {
			let _ = headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
		}

		let body = request.body();
		let content_length = match body {
			None if *request.method() == Method::POST || *request.method() == Method::PUT => {
				Some(0)
			}
			None => None,
			Some(body) => body.total_bytes(),
		};
		if let Some(length) = content_length {
			let _ = headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
		}

		if !headers.contains_key(USER_AGENT) {
			let _ = headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
		}
		if request.compress() {
			let _ = headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip,deflate"));
		}
		if !headers.contains_key(CONNECTION) && request.agent().is_none() {
			let _ = headers.insert(CONNECTION, HeaderValue::from_static("close"));
		}

		Ok(Self {
			method: request.method().clone(),
			url: url.clone(),
			secure,
			host,
			port,
			target,
			headers,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::agent::KeepAliveAgent;
	use crate::body::Body;
	use crate::request::RequestInit;
	use crate::ErrorKind;
	use std::sync::Arc;

	fn options(url: &str, init: RequestInit) -> Result<TransportOptions, FetchError> {
		TransportOptions::new(&Request::new(url, init).unwrap())
	}

	/// Tests the default headers added to a plain GET.
	#[test]
	fn test_defaults() {
		let o = options("http://example.com/a/b?c=d#frag", RequestInit::new()).unwrap();
		assert_eq!(o.method, Method::GET);
		assert!(!o.secure);
		assert_eq!(o.host, "example.com");
		assert_eq!(o.port, 80);
		assert_eq!(o.target, "/a/b?c=d");
		assert_eq!(o.headers[ACCEPT], "*/*");
		assert_eq!(o.headers[USER_AGENT], DEFAULT_USER_AGENT);
		assert_eq!(o.headers[ACCEPT_ENCODING], "gzip,deflate");
		assert_eq!(o.headers[CONNECTION], "close");
		assert!(!o.headers.contains_key(CONTENT_LENGTH));
	}

	/// Tests that explicit headers are not overridden, except Accept-Encoding when compressing.
	#[test]
	fn test_explicit_headers() {
		let o = options(
			"https://example.com:8443/",
			RequestInit::new()
				.header("accept", "text/html")
				.header("user-agent", "custom")
				.header("accept-encoding", "identity")
				.header("connection", "keep-alive"),
		)
		.unwrap();
		assert!(o.secure);
		assert_eq!(o.host, "example.com:8443");
		assert_eq!(o.port, 8443);
		assert_eq!(o.headers[ACCEPT], "text/html");
		assert_eq!(o.headers[USER_AGENT], "custom");
		assert_eq!(o.headers[ACCEPT_ENCODING], "gzip,deflate");
		assert_eq!(o.headers[CONNECTION], "keep-alive");
	}

	/// Tests that a caller's Accept-Encoding is kept when compression is off.
	#[test]
	fn test_accept_encoding_without_compress() {
		let o = options(
			"http://example.com/",
			RequestInit::new()
				.compress(false)
				.header("accept-encoding", "br"),
		)
		.unwrap();
		assert_eq!(o.headers[ACCEPT_ENCODING], "br");
		assert_eq!(o.headers.get_all(ACCEPT_ENCODING).iter().count(), 1);
	}

	/// Tests the computed Content-Length.
	#[test]
	fn test_content_length() {
		let o = options("http://example.com/", RequestInit::new().method("POST")).unwrap();
		assert_eq!(o.headers[CONTENT_LENGTH], "0");
		let o = options("http://example.com/", RequestInit::new().method("DELETE")).unwrap();
		assert!(!o.headers.contains_key(CONTENT_LENGTH));
		let o = options(
			"http://example.com/",
			RequestInit::new().method("PUT").body("12345"),
		)
		.unwrap();
		assert_eq!(o.headers[CONTENT_LENGTH], "5");
		let o = options(
			"http://example.com/",
			RequestInit::new()
				.method("POST")
				.body(Body::from_reader(&b"abc"[..], None)),
		)
		.unwrap();
		assert!(!o.headers.contains_key(CONTENT_LENGTH));
	}

	/// Tests that compression and connection defaults follow the request settings.
	#[test]
	fn test_compress_and_agent() {
		let o = options(
			"http://example.com/",
			RequestInit::new()
				.compress(false)
				.agent(Arc::new(KeepAliveAgent::new())),
		)
		.unwrap();
		assert!(!o.headers.contains_key(ACCEPT_ENCODING));
		assert!(!o.headers.contains_key(CONNECTION));
	}

	/// Tests the URL checks.
	#[test]
	fn test_bad_urls() {
		let e = options("ftp://example.com/", RequestInit::new()).unwrap_err();
		assert_eq!(e.kind(), ErrorKind::InvalidInput);
		assert_eq!(e.to_string(), "Only HTTP(S) protocols are supported");
		let e = options("mailto:someone@example.com", RequestInit::new()).unwrap_err();
		assert_eq!(e.to_string(), "Only absolute URLs are supported");
	}

	/// Tests that the request itself is left unchanged.
	#[test]
	fn test_request_untouched() {
		let r = Request::new("http://example.com/", RequestInit::new()).unwrap();
		let _ = TransportOptions::new(&r).unwrap();
		assert!(r.headers().is_empty());
	}
}
