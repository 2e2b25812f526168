#![forbid(unsafe_code)]
#![warn(
	future_incompatible,
	nonstandard_style,
	rust_2018_idioms,
	rustdoc::all,
	unused
)]
#![warn(
	deprecated_in_future,
	missing_debug_implementations,
	missing_docs,
	// Disabled due to <https://github.com/rust-lang/rust/issues/69952> and
	// <https://github.com/rust-lang/rust/issues/77217>.
	// single_use_lifetimes,
	trivial_casts,
	trivial_numeric_casts,
	unused_crate_dependencies,
	unused_import_braces,
	// Disabled due to <https://github.com/rust-lang/rust/issues/77217>.
	// unused_lifetimes,
	unused_qualifications,
	unused_results
)]
#![warn(clippy::pedantic, clippy::cargo)]
// Disabled because we frequently mix u64 and usize, where the former is used for message body
// lengths and the latter for in-memory buffer sizes.
#![allow(clippy::cast_possible_truncation)]
// Disabled because the doc example is not the only example needed by most items.
#![allow(rustdoc::missing_doc_code_examples)]

//! Asynchronous HTTP Client with Fetch Semantics
//!
//! This crate is an HTTP/1.1 client library modelled on the `fetch` API: a single [`fetch`]
//! function takes a URL or [`Request`] plus a set of [`RequestInit`] options, follows redirects
//! according to the request’s [`RedirectMode`], transparently removes `gzip` and `deflate`
//! content codings, and returns a [`Response`] whose body can be read once.
//!
//! Connections come from an [`Agent`]. By default each request opens a new TCP connection (with
//! TLS via `rustls` for `https:` URLs); a [`KeepAliveAgent`] shared between requests reuses
//! persistent connections. `data:` and `file:` URLs are answered without any connection.
//!
//! All I/O runs on the caller’s Tokio runtime; no tasks or threads are spawned.
//!
//! # Example
//! ```
//! use httpfetch::{fetch, HasBody as _, RequestInit};
//!
//! let runtime = tokio::runtime::Builder::new_current_thread()
//!		.enable_all()
//!		.build()
//!		.unwrap();
//! runtime.block_on(async {
//!		let mut response = fetch("data:,Hello%2C%20World!", RequestInit::new())
//!			.await
//!			.unwrap();
//!		assert!(response.ok());
//!		assert_eq!(response.status(), 200);
//!		assert_eq!(response.text().await.unwrap(), "Hello, World!");
//! })
//! ```

mod agent;
mod body;
mod decode;
pub mod error;
mod fetch;
mod local;
pub mod redirect;
mod request;
mod response;
mod util;

pub use agent::{Agent, BoxSocket, KeepAliveAgent, Socket, TcpAgent};
pub use body::{Body, BodyLimits, BoxRead, HasBody};
pub use decode::{decode, DecodeContext};
pub use error::{ErrorKind, FetchError};
pub use fetch::fetch;
pub use redirect::is_redirect;
pub use request::{Input, RedirectMode, Request, RequestInit, TransportOptions, DEFAULT_FOLLOW};
pub use response::Response;
