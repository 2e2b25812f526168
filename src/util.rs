pub mod io;

use http::header::{HeaderMap, CONNECTION};

/// Checks whether a byte is a `tchar` (token character).
pub fn is_tchar(b: u8) -> bool {
	b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Checks whether a string is a token.
pub fn is_token(name: &str) -> bool {
	!name.is_empty() && name.bytes().all(is_tchar)
}

/// Checks whether a byte is a valid character to appear in a `request-target`.
///
/// This check is relaxed and does not check the full requirements for path validity.
pub fn is_request_target_char(b: u8) -> bool {
	(0x21_u8..=0x7E_u8).contains(&b)
}

/// Checks whether a string is a `request-target`.
///
/// This check is relaxed and does not check the full requirements for path validity.
pub fn is_request_target(req: &str) -> bool {
	!req.is_empty() && req.bytes().all(is_request_target_char)
}

/// Iterates over the comma-separated elements of every instance of a header, with surrounding
/// whitespace removed and empty elements skipped.
pub fn header_tokens<'a>(
	headers: &'a HeaderMap,
	name: impl http::header::AsHeaderName,
) -> impl Iterator<Item = &'a [u8]> + 'a {
	headers
		.get_all(name)
		.into_iter()
		.flat_map(|value| value.as_bytes().split(|b| *b == b','))
		.map(<[u8]>::trim_ascii)
		.filter(|token| !token.is_empty())
}

/// Scans the headers and determines whether the `connection` header is present and contains the
/// `close` option.
pub fn is_connection_close(headers: &HeaderMap) -> bool {
	header_tokens(headers, CONNECTION).any(|option| option.eq_ignore_ascii_case(b"close"))
}
