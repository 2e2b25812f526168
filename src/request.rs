mod body;
mod headers;
mod options;

pub(crate) use body::{send as send_body, Framing};
pub(crate) use headers::send as send_headers;
pub use options::TransportOptions;

use crate::agent::Agent;
use crate::body::{Body, BodyLimits, HasBody};
use crate::error::FetchError;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The default maximum number of redirects followed by one fetch.
pub const DEFAULT_FOLLOW: u32 = 20;

/// How redirect responses are handled.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RedirectMode {
	/// Redirects are followed, up to the request’s `follow` limit.
	#[default]
	Follow,

	/// A redirect response fails the fetch with [`NoRedirect`](crate::ErrorKind::NoRedirect).
	Error,

	/// A redirect response is returned to the caller as-is, except that a relative `Location`
	/// header is made absolute.
	Manual,
}

/// The thing a request is made from.
#[derive(Debug)]
pub enum Input {
	/// A URL in string form, which must be absolute.
	Str(String),

	/// An already-parsed URL.
	Url(Url),

	/// An existing request whose URL and settings seed the defaults of the new request.
	///
	/// The new request takes over the existing request’s body, so the body must not have been
	/// consumed. Use [`Request::try_clone`] first to keep the original usable.
	Request(Request),
}

impl From<&str> for Input {
	fn from(s: &str) -> Self {
		Self::Str(s.to_owned())
	}
}

impl From<String> for Input {
	fn from(s: String) -> Self {
		Self::Str(s)
	}
}

impl From<Url> for Input {
	fn from(url: Url) -> Self {
		Self::Url(url)
	}
}

impl From<&Url> for Input {
	fn from(url: &Url) -> Self {
		Self::Url(url.clone())
	}
}

impl From<Request> for Input {
	fn from(request: Request) -> Self {
		Self::Request(request)
	}
}

/// The options used to build a [`Request`].
///
/// Every option left unset takes its value from the [`Input::Request`] the request is built from,
/// if any, or otherwise from the default. Header conversion errors are held until the request is
/// built.
///
/// # Example
/// ```
/// use httpfetch::{RedirectMode, RequestInit};
/// use std::time::Duration;
///
/// let init = RequestInit::new()
/// 	.method("post")
/// 	.header("x-api-key", "secret")
/// 	.body("payload")
/// 	.redirect(RedirectMode::Manual)
/// 	.timeout(Duration::from_secs(10));
/// let request = httpfetch::Request::new("https://example.com/upload", init).unwrap();
/// assert_eq!(request.method(), http::Method::POST);
/// ```
#[derive(Debug, Default)]
pub struct RequestInit {
	method: Option<String>,
	headers: Option<HeaderMap>,
	body: Option<Body>,
	redirect: Option<RedirectMode>,
	follow: Option<u32>,
	compress: Option<bool>,
	counter: Option<u32>,
	agent: Option<Arc<dyn Agent>>,
	timeout: Option<Duration>,
	size: Option<u64>,

	/// The first error encountered while converting builder arguments.
	error: Option<FetchError>,
}

impl RequestInit {
	/// Creates an empty set of options.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the request method. The method is upper-cased when the request is built.
	#[must_use]
	pub fn method(mut self, method: impl AsRef<str>) -> Self {
		self.method = Some(method.as_ref().to_owned());
		self
	}

	/// Appends a request header.
	///
	/// Once any header is set, the headers of an input request are no longer inherited.
	#[must_use]
	pub fn header<K, V>(mut self, name: K, value: V) -> Self
	where
		K: TryInto<HeaderName>,
		<K as TryInto<HeaderName>>::Error: Into<http::Error>,
		V: TryInto<HeaderValue>,
		<V as TryInto<HeaderValue>>::Error: Into<http::Error>,
	{
		if self.error.is_some() {
			return self;
		}
		let converted = name
			.try_into()
			.map_err(Into::<http::Error>::into)
			.and_then(|name| {
				let value = value.try_into().map_err(Into::<http::Error>::into)?;
				Ok((name, value))
			});
		match converted {
			Ok((name, value)) => {
				let _ = self
					.headers
					.get_or_insert_with(HeaderMap::new)
					.append(name, value);
			}
			Err(e) => self.error = Some(e.into()),
		}
		self
	}

	/// Replaces the request headers with a complete header map.
	#[must_use]
	pub fn headers(mut self, headers: HeaderMap) -> Self {
		self.headers = Some(headers);
		self
	}

	/// Sets the request body.
	#[must_use]
	pub fn body(mut self, body: impl Into<Body>) -> Self {
		self.body = Some(body.into());
		self
	}

	/// Sets how redirects are handled.
	#[must_use]
	pub fn redirect(mut self, redirect: RedirectMode) -> Self {
		self.redirect = Some(redirect);
		self
	}

	/// Sets the maximum number of redirects to follow.
	#[must_use]
	pub fn follow(mut self, follow: u32) -> Self {
		self.follow = Some(follow);
		self
	}

	/// Sets whether to request and transparently decode compressed content.
	#[must_use]
	pub fn compress(mut self, compress: bool) -> Self {
		self.compress = Some(compress);
		self
	}

	/// Sets the number of redirects already followed.
	#[must_use]
	pub fn counter(mut self, counter: u32) -> Self {
		self.counter = Some(counter);
		self
	}

	/// Sets the agent that provides connections.
	#[must_use]
	pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
		self.agent = Some(agent);
		self
	}

	/// Sets the time allowed for each request and for reading the response body. Zero means no
	/// limit.
	#[must_use]
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Sets the maximum size of the response body in bytes. Zero means no limit.
	#[must_use]
	pub fn size(mut self, size: u64) -> Self {
		self.size = Some(size);
		self
	}
}

/// A request descriptor: the URL, method, headers, and body of a request, plus the settings that
/// control how it is executed.
#[derive(Debug)]
pub struct Request {
	url: Url,
	method: Method,
	headers: HeaderMap,
	body: Option<Body>,
	redirect: RedirectMode,
	follow: u32,
	compress: bool,
	counter: u32,
	agent: Option<Arc<dyn Agent>>,
	timeout: Option<Duration>,
	size: Option<u64>,
}

impl Request {
	/// Builds a request.
	///
	/// # Errors
	/// This function returns an error of kind [`InvalidInput`](crate::ErrorKind::InvalidInput) if
	/// the URL cannot be parsed, the method is not a valid token or is `CONNECT`, a header could
	/// not be converted, a body is given for a `GET` or `HEAD` request, or an inherited body was
	/// already consumed.
	pub fn new(input: impl Into<Input>, init: RequestInit) -> Result<Self, FetchError> {
		let RequestInit {
			method,
			headers,
			body,
			redirect,
			follow,
			compress,
			counter,
			agent,
			timeout,
			size,
			error,
		} = init;
		if let Some(e) = error {
			return Err(e);
		}

		let (url, mut prior) = match input.into() {
			Input::Str(s) => (Url::parse(&s)?, None),
			Input::Url(url) => (url, None),
			Input::Request(request) => (request.url.clone(), Some(request)),
		};

		let method = match method {
			Some(method) => parse_method(&method)?,
			None => prior.as_ref().map_or(Method::GET, |p| p.method.clone()),
		};

		let body = match body {
			Some(body) => Some(body),
			None => match prior.as_mut().and_then(|p| p.body.take()) {
				Some(inherited) if inherited.is_used() => {
					return Err(FetchError::invalid_input(
						"cannot clone body after it is used",
					));
				}
				inherited => inherited,
			},
		};
		if body.is_some() && (method == Method::GET || method == Method::HEAD) {
			return Err(FetchError::invalid_input(
				"Request with GET/HEAD method cannot have body",
			));
		}

		let mut headers = headers
			.or_else(|| prior.as_mut().map(|p| std::mem::take(&mut p.headers)))
			.unwrap_or_default();
		if !headers.contains_key(CONTENT_TYPE) {
			if let Some(mime) = body.as_ref().and_then(Body::mime) {
				let _ = headers.append(CONTENT_TYPE, mime.clone());
			}
		}

		let prior = prior.as_ref();
		Ok(Self {
			url,
			method,
			headers,
			body,
			redirect: redirect.or(prior.map(|p| p.redirect)).unwrap_or_default(),
			follow: follow.or(prior.map(|p| p.follow)).unwrap_or(DEFAULT_FOLLOW),
			compress: compress.or(prior.map(|p| p.compress)).unwrap_or(true),
			counter: counter.or(prior.map(|p| p.counter)).unwrap_or(0),
			agent: agent.or_else(|| prior.and_then(|p| p.agent.clone())),
			timeout: match timeout {
				Some(t) => Some(t).filter(|t| !t.is_zero()),
				None => prior.and_then(|p| p.timeout),
			},
			size: match size {
				Some(s) => Some(s).filter(|s| *s != 0),
				None => prior.and_then(|p| p.size),
			},
		})
	}

	/// Returns the URL.
	#[must_use]
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Returns the method.
	#[must_use]
	pub fn method(&self) -> &Method {
		&self.method
	}

	/// Returns the headers.
	#[must_use]
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Returns the headers mutably.
	pub fn headers_mut(&mut self) -> &mut HeaderMap {
		&mut self.headers
	}

	/// Returns how redirects are handled.
	#[must_use]
	pub fn redirect(&self) -> RedirectMode {
		self.redirect
	}

	/// Returns the maximum number of redirects to follow.
	#[must_use]
	pub fn follow(&self) -> u32 {
		self.follow
	}

	/// Returns whether compressed content is requested and decoded.
	#[must_use]
	pub fn compress(&self) -> bool {
		self.compress
	}

	/// Returns the number of redirects followed to reach this request.
	#[must_use]
	pub fn counter(&self) -> u32 {
		self.counter
	}

	/// Returns the agent, if one was configured.
	#[must_use]
	pub fn agent(&self) -> Option<&Arc<dyn Agent>> {
		self.agent.as_ref()
	}

	/// Returns the request timeout, if any.
	#[must_use]
	pub fn timeout(&self) -> Option<Duration> {
		self.timeout
	}

	/// Returns the maximum response body size, if any.
	#[must_use]
	pub fn size(&self) -> Option<u64> {
		self.size
	}

	/// Produces an independent copy of the request.
	///
	/// # Errors
	/// This function returns an error of kind [`InvalidInput`](crate::ErrorKind::InvalidInput) if
	/// the body was already consumed.
	pub fn try_clone(&self) -> Result<Self, FetchError> {
		let body = self.body.as_ref().map(Body::try_clone).transpose()?;
		Ok(self.derive(self.url.clone(), self.method.clone(), self.headers.clone(), body))
	}

	/// Builds the request for the next hop of a redirect chain.
	///
	/// If `rewrite_to_get` is set, the new request is a `GET` without a body or `Content-Length`;
	/// otherwise it repeats the method and body. The counter is incremented.
	pub(crate) fn redirect_to(&self, url: Url, rewrite_to_get: bool) -> Result<Self, FetchError> {
		let mut headers = self.headers.clone();
		let (method, body) = if rewrite_to_get {
			let _ = headers.remove(CONTENT_LENGTH);
			(Method::GET, None)
		} else {
			(
				self.method.clone(),
				self.body.as_ref().map(Body::try_clone).transpose()?,
			)
		};
		let mut next = self.derive(url, method, headers, body);
		next.counter += 1;
		Ok(next)
	}

	/// Builds a request with new identity fields and this request’s settings.
	fn derive(&self, url: Url, method: Method, headers: HeaderMap, body: Option<Body>) -> Self {
		Self {
			url,
			method,
			headers,
			body,
			redirect: self.redirect,
			follow: self.follow,
			compress: self.compress,
			counter: self.counter,
			agent: self.agent.clone(),
			timeout: self.timeout,
			size: self.size,
		}
	}
}

impl HasBody for Request {
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
		BodyLimits {
			size: self.size,
			timeout: self.timeout,
		}
	}
}

/// Parses and upper-cases a method name.
fn parse_method(method: &str) -> Result<Method, FetchError> {
	let upper = method.to_ascii_uppercase();
	let parsed = Method::from_bytes(upper.as_bytes()).map_err(|e| {
		FetchError::with_cause(
			crate::ErrorKind::InvalidInput,
			format!("Invalid method: {method}"),
			e,
		)
	})?;
	if parsed == Method::CONNECT {
		return Err(FetchError::invalid_input(
			"Request method CONNECT is not supported",
		));
	}
	Ok(parsed)
}

/// Information about a request that is needed to interpret the response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Metadata {
	/// Whether the method was `HEAD`.
	pub(crate) head: bool,

	/// Whether there was a `Connection` header with the value `close`.
	pub(crate) connection_close: bool,
}
