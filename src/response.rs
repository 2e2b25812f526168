mod body;
mod headers;

pub(crate) use body::{Receive, Recycler};
pub(crate) use headers::{receive as receive_head, Head};

use crate::body::{Body, BodyLimits, HasBody};
use crate::error::FetchError;
use http::header::HeaderMap;
use url::Url;

/// The terminal response of a fetch.
///
/// The body has its content codings removed, unless decompression was disabled. It can be read
/// once, through the [`HasBody`] methods.
#[derive(Debug)]
pub struct Response {
	/// The final URL, after any redirects.
	url: Url,

	/// The status code.
	status: u16,

	/// The reason phrase.
	status_text: String,

	/// The response headers.
	headers: HeaderMap,

	/// The body.
	body: Body,

	/// The number of redirects followed to obtain this response.
	counter: u32,

	/// The limits applied when the body is consumed.
	limits: BodyLimits,
}

impl Response {
	/// Constructs a new `Response`.
	pub(crate) fn new(
		url: Url,
		status: u16,
		status_text: String,
		headers: HeaderMap,
		body: Body,
		counter: u32,
		limits: BodyLimits,
	) -> Self {
		Self {
			url,
			status,
			status_text,
			headers,
			body,
			counter,
			limits,
		}
	}

	/// Returns the final URL, after any redirects.
	#[must_use]
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Returns the status code.
	#[must_use]
	pub fn status(&self) -> u16 {
		self.status
	}

	/// Returns the reason phrase.
	#[must_use]
	pub fn status_text(&self) -> &str {
		&self.status_text
	}

	/// Returns the response headers.
	///
	/// Fields that appeared more than once are all present, in the order received.
	#[must_use]
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// Returns whether the status code is in the range 200–299.
	#[must_use]
	pub fn ok(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns whether any redirect was followed to obtain this response.
	#[must_use]
	pub fn redirected(&self) -> bool {
		self.counter > 0
	}

	/// Returns the number of redirects followed to obtain this response.
	#[must_use]
	pub fn counter(&self) -> u32 {
		self.counter
	}

	/// Returns the size limit applied when the body is consumed, if any.
	#[must_use]
	pub fn size(&self) -> Option<u64> {
		self.limits.size
	}

	/// Returns the timeout applied when the body is consumed, if any.
	#[must_use]
	pub fn timeout(&self) -> Option<std::time::Duration> {
		self.limits.timeout
	}

	/// Duplicates the response.
	///
	/// The two copies’ bodies can be consumed independently.
	///
	/// # Errors
	/// This function returns an error of kind [`InvalidInput`](crate::ErrorKind::InvalidInput) if
	/// the body was already consumed.
	pub fn try_clone(&self) -> Result<Self, FetchError> {
		Ok(Self {
			url: self.url.clone(),
			status: self.status,
			status_text: self.status_text.clone(),
			headers: self.headers.clone(),
			body: self.body.try_clone()?,
			counter: self.counter,
			limits: self.limits,
		})
	}
}

impl HasBody for Response {
	fn body(&self) -> Option<&Body> {
		Some(&self.body)
	}

	fn body_mut(&mut self) -> Option<&mut Body> {
		Some(&mut self.body)
	}

	fn body_url(&self) -> &Url {
		&self.url
	}

	fn body_limits(&self) -> BodyLimits {
		self.limits
	}
}
