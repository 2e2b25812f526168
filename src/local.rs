//! Fetching `data:` and `file:` URLs, which never touch the network.

use crate::body::{Body, BodyLimits};
use crate::error::{ErrorKind, FetchError};
use crate::request::Request;
use crate::response::Response;
use base64::alphabet::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use http::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use url::{Position, Url};

/// The media type of a `data:` URL that names none.
const DEFAULT_DATA_TYPE: &str = "text/plain;charset=US-ASCII";

/// A base64 decoder that does not insist on padding.
const BASE64: GeneralPurpose = GeneralPurpose::new(
	&STANDARD,
	GeneralPurposeConfig::new()
		.with_decode_padding_mode(DecodePaddingMode::Indifferent)
		.with_decode_allow_trailing_bits(true),
);

/// Answers a request for a `data:` URL.
///
/// The URL has the form `data:[<mediatype>][;base64],<data>`.
///
/// # Errors
/// This function returns an error of kind [`InvalidInput`](ErrorKind::InvalidInput) if the URL has
/// no comma, the base64 content is invalid, or the media type is not a valid header value.
pub(crate) fn data(request: &Request) -> Result<Response, FetchError> {
	let url = request.url();
	let content = &url[Position::BeforePath..Position::AfterQuery];
	let Some((meta, payload)) = content.split_once(',') else {
		return Err(FetchError::invalid_input(format!("invalid data URL: {url}")));
	};

	let (media_type, bytes) = match strip_suffix_ignore_case(meta, ";base64") {
		Some(media_type) => {
			let text: Vec<u8> = percent_encoding::percent_decode_str(payload)
				.filter(|b| !b.is_ascii_whitespace())
				.collect();
			let bytes = BASE64.decode(text).map_err(|e| {
				FetchError::with_cause(
					ErrorKind::InvalidInput,
					format!("invalid data URL: {url}"),
					e,
				)
			})?;
			(media_type, bytes)
		}
		None => (
			meta,
			percent_encoding::percent_decode_str(payload).collect::<Vec<u8>>(),
		),
	};

	let media_type = if media_type.is_empty() {
		DEFAULT_DATA_TYPE.to_owned()
	} else if media_type.starts_with(';') {
		format!("text/plain{media_type}")
	} else {
		media_type.to_owned()
	};
	let media_type = percent_encoding::percent_decode_str(&media_type).decode_utf8_lossy();
	let mut headers = HeaderMap::new();
	let _ = headers.insert(
		CONTENT_TYPE,
		HeaderValue::from_str(&media_type).map_err(http::Error::from)?,
	);
	tracing::trace!(bytes = bytes.len(), %media_type, "decoded data URL");
	Ok(local_response(request, url.clone(), headers, bytes))
}

/// Answers a request for a `file:` URL by reading the whole file.
///
/// # Errors
/// This function returns an error of kind [`InvalidInput`](ErrorKind::InvalidInput) if the URL
/// does not name a local path, or [`System`](ErrorKind::System) carrying the I/O error if the file
/// cannot be read.
pub(crate) async fn file(request: &Request) -> Result<Response, FetchError> {
	let url = request.url();
	let path = url
		.to_file_path()
		.map_err(|()| FetchError::invalid_input(format!("invalid file URL: {url}")))?;
	let bytes = tokio::fs::read(&path).await.map_err(FetchError::io)?;
	tracing::trace!(path = %path.display(), bytes = bytes.len(), "read file URL");
	Ok(local_response(request, url.clone(), HeaderMap::new(), bytes))
}

/// Builds the 200 response for locally produced content.
fn local_response(request: &Request, url: Url, mut headers: HeaderMap, bytes: Vec<u8>) -> Response {
	let _ = headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
	Response::new(
		url,
		200,
		"OK".to_owned(),
		headers,
		Body::from(bytes),
		request.counter(),
		BodyLimits {
			size: request.size(),
			timeout: request.timeout(),
		},
	)
}

/// Removes an ASCII suffix from a string, ignoring case.
fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
	let split = s.len().checked_sub(suffix.len())?;
	if s.is_char_boundary(split) && s[split..].eq_ignore_ascii_case(suffix) {
		Some(&s[..split])
	} else {
		None
	}
}
