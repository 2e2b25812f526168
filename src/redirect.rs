//! Redirect handling.

use crate::body::HasBody as _;
use crate::error::{ErrorKind, FetchError};
use crate::request::{RedirectMode, Request};
use http::header::{HeaderMap, HeaderValue, LOCATION};
use http::Method;
use url::Url;

/// Returns whether a status code is one of the redirects a fetch can follow: 301, 302, 303, 307
/// or 308.
///
/// # Example
/// ```
/// assert!(httpfetch::is_redirect(302));
/// assert!(!httpfetch::is_redirect(304));
/// ```
#[must_use]
pub fn is_redirect(code: u16) -> bool {
	matches!(code, 301 | 302 | 303 | 307 | 308)
}

/// Decides what to do with a response to `request`.
///
/// Returns `Ok(None)` if the response is the final one: either it is not a redirect, or the
/// redirect mode is [`Manual`](RedirectMode::Manual). In manual mode, a `Location` header that
/// resolves against the request URL is rewritten in `headers` to the absolute URL.
///
/// Otherwise, returns the request for the next hop. Status 303, and 301 or 302 in response to a
/// `POST`, turn it into a bodiless `GET`; other redirects repeat the method and body.
///
/// # Errors
/// This function returns an error of kind:
/// * [`NoRedirect`](ErrorKind::NoRedirect) if the redirect mode is
///   [`Error`](RedirectMode::Error)
/// * [`MaxRedirect`](ErrorKind::MaxRedirect) if the request has already followed its limit of
///   redirects
/// * [`InvalidRedirect`](ErrorKind::InvalidRedirect) if the `Location` header is missing or does
///   not resolve to a URL
/// * [`UnsupportedRedirect`](ErrorKind::UnsupportedRedirect) if the method and body must be
///   repeated but the body is a stream, which cannot be sent twice
pub fn resolve(
	request: &Request,
	status: u16,
	headers: &mut HeaderMap,
) -> Result<Option<Request>, FetchError> {
	if !is_redirect(status) {
		return Ok(None);
	}
	let url = request.url();
	let location = headers.get(LOCATION).map(|value| locate(url, value));

	match request.redirect() {
		RedirectMode::Manual => {
			if let Some(Some(target)) = location {
				let value = HeaderValue::from_str(target.as_str()).map_err(http::Error::from)?;
				let _ = headers.insert(LOCATION, value);
			}
			return Ok(None);
		}
		RedirectMode::Error => {
			return Err(FetchError::new(
				ErrorKind::NoRedirect,
				format!("uri requested responds with a redirect, redirect mode is set to error: {url}"),
			));
		}
		RedirectMode::Follow => (),
	}

	if request.counter() >= request.follow() {
		return Err(FetchError::new(
			ErrorKind::MaxRedirect,
			format!("maximum redirect reached at: {url}"),
		));
	}
	let target = match location {
		None => {
			return Err(FetchError::new(
				ErrorKind::InvalidRedirect,
				format!("redirect location header missing at: {url}"),
			));
		}
		Some(None) => {
			let raw = headers
				.get(LOCATION)
				.map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
				.unwrap_or_default();
			return Err(FetchError::new(
				ErrorKind::InvalidRedirect,
				format!("uri requested responds with an invalid redirect URL: {raw}"),
			));
		}
		Some(Some(target)) => target,
	};

	let rewrite_to_get =
		status == 303 || (matches!(status, 301 | 302) && *request.method() == Method::POST);
	if !rewrite_to_get && request.body().is_some_and(|body| body.as_bytes().is_none()) {
		return Err(FetchError::new(
			ErrorKind::UnsupportedRedirect,
			"Cannot follow redirect with body being a readable stream",
		));
	}
	tracing::debug!(from = %url, to = %target, status, rewrite_to_get, "following redirect");
	request.redirect_to(target, rewrite_to_get).map(Some)
}

/// Resolves a `Location` header value against the URL it was received from.
fn locate(base: &Url, value: &HeaderValue) -> Option<Url> {
	let value = std::str::from_utf8(value.as_bytes()).ok()?;
	base.join(value).ok()
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::body::Body;
	use crate::request::RequestInit;

	fn request(method: &str, init: RequestInit) -> Request {
		Request::new("http://example.com/a/b", init.method(method)).unwrap()
	}

	fn location(value: &'static str) -> HeaderMap {
		let mut headers = HeaderMap::new();
		let _ = headers.insert(LOCATION, HeaderValue::from_static(value));
		headers
	}

	/// Tests the set of redirect status codes.
	#[test]
	fn test_is_redirect() {
		for code in [301, 302, 303, 307, 308] {
			assert!(is_redirect(code));
		}
		for code in [200, 300, 304, 305, 306, 309, 404] {
			assert!(!is_redirect(code));
		}
	}

	/// Tests that non-redirects are final and leave the headers alone.
	#[test]
	fn test_not_redirect() {
		let mut headers = location("/elsewhere");
		let next = resolve(&request("GET", RequestInit::new()), 200, &mut headers).unwrap();
		assert!(next.is_none());
		assert_eq!(headers[LOCATION], "/elsewhere");
	}

	/// Tests that a 303 turns any request into a bodiless GET.
	#[test]
	fn test_see_other() {
		let init = RequestInit::new()
			.body("payload")
			.header("content-length", "7");
		let mut headers = location("../c?x=1");
		let next = resolve(&request("PUT", init), 303, &mut headers)
			.unwrap()
			.unwrap();
		assert_eq!(next.url().as_str(), "http://example.com/c?x=1");
		assert_eq!(*next.method(), Method::GET);
		assert!(next.body().is_none());
		assert!(!next.headers().contains_key("content-length"));
		assert_eq!(next.counter(), 1);
	}

	/// Tests that 301 and 302 rewrite POST to GET but preserve other methods.
	#[test]
	fn test_moved() {
		for status in [301, 302] {
			let mut headers = location("/moved");
			let next = resolve(&request("POST", RequestInit::new().body("x")), status, &mut headers)
				.unwrap()
				.unwrap();
			assert_eq!(*next.method(), Method::GET);
			assert!(next.body().is_none());

			let next = resolve(&request("PUT", RequestInit::new().body("x")), status, &mut headers)
				.unwrap()
				.unwrap();
			assert_eq!(*next.method(), Method::PUT);
			assert_eq!(next.body().unwrap().as_bytes(), Some(&b"x"[..]));
		}
	}

	/// Tests that 307 and 308 preserve the method and a buffered body.
	#[test]
	fn test_temporary() {
		for status in [307, 308] {
			let mut headers = location("https://other.example/");
			let next = resolve(&request("POST", RequestInit::new().body("x")), status, &mut headers)
				.unwrap()
				.unwrap();
			assert_eq!(next.url().as_str(), "https://other.example/");
			assert_eq!(*next.method(), Method::POST);
			assert!(next.body().is_some());
		}
	}

	/// Tests that a redirect requiring a streamed body to be resent is refused.
	#[test]
	fn test_stream_body() {
		let body = Body::from_reader(&b"abc"[..], None);
		let mut headers = location("/next");
		let e = resolve(&request("PUT", RequestInit::new().body(body)), 307, &mut headers)
			.unwrap_err();
		assert_eq!(e.kind(), ErrorKind::UnsupportedRedirect);

		// A 303 drops the body, so it can be followed.
		let body = Body::from_reader(&b"abc"[..], None);
		assert!(resolve(&request("PUT", RequestInit::new().body(body)), 303, &mut headers)
			.unwrap()
			.is_some());
	}

	/// Tests the redirect limit.
	#[test]
	fn test_max_redirect() {
		let mut headers = location("/next");
		let req = request("GET", RequestInit::new().follow(2).counter(2));
		let e = resolve(&req, 302, &mut headers).unwrap_err();
		assert_eq!(e.kind(), ErrorKind::MaxRedirect);
		assert_eq!(e.message(), "maximum redirect reached at: http://example.com/a/b");

		let req = request("GET", RequestInit::new().follow(0));
		let e = resolve(&req, 302, &mut headers).unwrap_err();
		assert_eq!(e.kind(), ErrorKind::MaxRedirect);
	}

	/// Tests the error redirect mode.
	#[test]
	fn test_error_mode() {
		let mut headers = location("/next");
		let req = request("GET", RequestInit::new().redirect(RedirectMode::Error));
		let e = resolve(&req, 301, &mut headers).unwrap_err();
		assert_eq!(e.kind(), ErrorKind::NoRedirect);
		assert_eq!(
			e.message(),
			"uri requested responds with a redirect, redirect mode is set to error: http://example.com/a/b"
		);
	}

	/// Tests that manual mode absolutizes the location without following it.
	#[test]
	fn test_manual_mode() {
		let req = request("GET", RequestInit::new().redirect(RedirectMode::Manual));
		let mut headers = location("../c");
		assert!(resolve(&req, 302, &mut headers).unwrap().is_none());
		assert_eq!(headers[LOCATION], "http://example.com/c");

		let mut headers = HeaderMap::new();
		assert!(resolve(&req, 302, &mut headers).unwrap().is_none());
		assert!(headers.is_empty());
	}

	/// Tests missing and unresolvable locations.
	#[test]
	fn test_invalid_location() {
		let req = request("GET", RequestInit::new());
		let e = resolve(&req, 302, &mut HeaderMap::new()).unwrap_err();
		assert_eq!(e.kind(), ErrorKind::InvalidRedirect);
		assert_eq!(
			e.message(),
			"redirect location header missing at: http://example.com/a/b"
		);

		let mut headers = location("http://[::1");
		let e = resolve(&req, 302, &mut headers).unwrap_err();
		assert_eq!(e.kind(), ErrorKind::InvalidRedirect);
		assert_eq!(
			e.message(),
			"uri requested responds with an invalid redirect URL: http://[::1"
		);
	}
}
