//! Connection agents.
//!
//! An [`Agent`] produces connected sockets for requests and may take them back for reuse once a
//! response has been read in full. [`TcpAgent`] opens a new connection every time;
//! [`KeepAliveAgent`] keeps idle persistent connections per origin.

use async_compat::CompatExt as _;
use futures_core::future::BoxFuture;
use futures_io::{AsyncBufRead, AsyncWrite};
use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use url::{Host, Url};

/// A connected, buffered, bidirectional byte stream to an HTTP server.
///
/// This is implemented for every type with the required capabilities.
pub trait Socket: AsyncBufRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncBufRead + AsyncWrite + Send + Unpin> Socket for T {}

/// A boxed [`Socket`].
pub type BoxSocket = Box<dyn Socket>;

/// A source of connections.
///
/// Agents may be shared between concurrent fetches, so implementations do their own locking.
pub trait Agent: std::fmt::Debug + Send + Sync {
	/// Returns a socket connected to the origin of `url`, with TLS established if the scheme is
	/// `https`.
	///
	/// # Errors
	/// This function returns an error if the connection cannot be established.
	fn connect<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<BoxSocket>>;

	/// Takes back a socket whose response was read in full and whose connection may persist.
	///
	/// The default implementation closes the socket.
	fn recycle(&self, url: &Url, socket: BoxSocket) {
		let _ = url;
		drop(socket);
	}
}

/// An agent that opens a new TCP connection for every request.
///
/// HTTPS is supported when the `rustls-tls` feature is enabled, using the Mozilla root
/// certificates bundled by `webpki-roots`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpAgent;

impl TcpAgent {
	/// Constructs a new `TcpAgent`.
	#[must_use]
	pub fn new() -> Self {
		Self
	}
}

impl Agent for TcpAgent {
	fn connect<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<BoxSocket>> {
		Box::pin(connect(url))
	}
}

/// Opens a connection to the origin of `url`.
async fn connect(url: &Url) -> Result<BoxSocket> {
	let secure = match url.scheme() {
		"http" => false,
		"https" => true,
		scheme => {
			return Err(Error::new(
				ErrorKind::InvalidInput,
				format!("unsupported scheme {scheme}"),
			))
		}
	};
	let (Some(host), Some(port)) = (url.host(), url.port_or_known_default()) else {
		return Err(Error::new(ErrorKind::InvalidInput, "URL has no host"));
	};
	let stream = match host {
		Host::Domain(name) => tokio::net::TcpStream::connect((name, port)).await?,
		Host::Ipv4(addr) => tokio::net::TcpStream::connect((addr, port)).await?,
		Host::Ipv6(addr) => tokio::net::TcpStream::connect((addr, port)).await?,
	};
	stream.set_nodelay(true)?;
	tracing::debug!(%url, peer = ?stream.peer_addr().ok(), secure, "connected");
	if secure {
		tls::connect(&host, stream).await
	} else {
		Ok(Box::new(tokio::io::BufReader::new(stream).compat()))
	}
}

#[cfg(feature = "rustls-tls")]
mod tls {
	use super::BoxSocket;
	use async_compat::CompatExt as _;
	use rustls::pki_types::ServerName;
	use rustls::{ClientConfig, RootCertStore};
	use std::io::{Error, ErrorKind, Result};
	use std::sync::{Arc, OnceLock};
	use tokio::net::TcpStream;
	use tokio_rustls::TlsConnector;
	use url::Host;

	/// Returns the process-wide client configuration, building it on first use.
	fn config() -> Result<Arc<ClientConfig>> {
		static CONFIG: OnceLock<std::result::Result<Arc<ClientConfig>, rustls::Error>> =
			OnceLock::new();
		CONFIG
			.get_or_init(|| {
				let mut roots = RootCertStore::empty();
				roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
				let config = ClientConfig::builder_with_provider(Arc::new(
					rustls::crypto::ring::default_provider(),
				))
				.with_safe_default_protocol_versions()?
				.with_root_certificates(roots)
				.with_no_client_auth();
				Ok(Arc::new(config))
			})
			.clone()
			.map_err(|e| Error::new(ErrorKind::Other, e))
	}

	/// Performs the TLS handshake over a connected stream.
	pub(super) async fn connect(host: &Host<&str>, stream: TcpStream) -> Result<BoxSocket> {
		let name = match *host {
			Host::Domain(name) => name.to_owned(),
			Host::Ipv4(addr) => addr.to_string(),
			Host::Ipv6(addr) => addr.to_string(),
		};
		let name = ServerName::try_from(name)
			.map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;
		let stream = TlsConnector::from(config()?).connect(name, stream).await?;
		Ok(Box::new(tokio::io::BufReader::new(stream).compat()))
	}
}

#[cfg(not(feature = "rustls-tls"))]
mod tls {
	use super::BoxSocket;
	use std::io::{Error, ErrorKind, Result};
	use tokio::net::TcpStream;
	use url::Host;

	pub(super) async fn connect(_host: &Host<&str>, _stream: TcpStream) -> Result<BoxSocket> {
		Err(Error::new(
			ErrorKind::Unsupported,
			"HTTPS support requires the rustls-tls feature",
		))
	}
}

/// The default number of idle connections kept per origin.
const DEFAULT_MAX_IDLE: usize = 8;

/// An agent that keeps persistent connections open for reuse.
///
/// Idle connections are keyed by origin (scheme, host and port). New connections are opened the
/// same way as [`TcpAgent`]. A connection the server has closed while idle is only discovered when
/// the next request on it fails.
pub struct KeepAliveAgent {
	/// The idle connections, most recently returned last.
	idle: Mutex<HashMap<String, Vec<BoxSocket>>>,

	/// The maximum number of idle connections per origin.
	max_idle: usize,
}

impl KeepAliveAgent {
	/// Constructs a new `KeepAliveAgent` keeping up to eight idle connections per origin.
	#[must_use]
	pub fn new() -> Self {
		Self::with_max_idle(DEFAULT_MAX_IDLE)
	}

	/// Constructs a new `KeepAliveAgent` keeping up to `max_idle` idle connections per origin.
	#[must_use]
	pub fn with_max_idle(max_idle: usize) -> Self {
		Self {
			idle: Mutex::new(HashMap::new()),
			max_idle,
		}
	}

	/// Returns the total number of idle connections held.
	#[must_use]
	pub fn idle_connections(&self) -> usize {
		self.idle
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.values()
			.map(Vec::len)
			.sum()
	}

	/// Removes and returns a live idle connection to the origin of `url`.
	///
	/// Idle connections that the server has closed in the meantime are discarded on the way.
	fn take_idle(&self, url: &Url) -> Option<BoxSocket> {
		let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
		let origin = url.origin().ascii_serialization();
		let sockets = idle.get_mut(&origin)?;
		let mut found = None;
		while let Some(mut socket) = sockets.pop() {
			if is_idle(&mut socket) {
				found = Some(socket);
				break;
			}
			tracing::trace!(%url, "discarding closed idle connection");
		}
		if sockets.is_empty() {
			let _ = idle.remove(&origin);
		}
		found
	}
}

/// Checks, without waiting, that an idle socket has nothing to read.
///
/// End of stream, an error, or unsolicited data all mean the connection cannot carry another
/// request.
fn is_idle(socket: &mut BoxSocket) -> bool {
	let mut cx = Context::from_waker(futures_util::task::noop_waker_ref());
	matches!(Pin::new(socket).poll_fill_buf(&mut cx), Poll::Pending)
}

impl Default for KeepAliveAgent {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for KeepAliveAgent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeepAliveAgent")
			.field("idle", &self.idle_connections())
			.field("max_idle", &self.max_idle)
			.finish()
	}
}

impl Agent for KeepAliveAgent {
	fn connect<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<BoxSocket>> {
		Box::pin(async move {
			if let Some(socket) = self.take_idle(url) {
				tracing::trace!(%url, "reusing idle connection");
				return Ok(socket);
			}
			connect(url).await
		})
	}

	fn recycle(&self, url: &Url, socket: BoxSocket) {
		let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
		let sockets = idle.entry(url.origin().ascii_serialization()).or_default();
		if sockets.len() < self.max_idle {
			sockets.push(socket);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::util::io::{AsyncBufReadExt as _, AsyncWriteExt as _};
	use std::time::Duration;
	use tokio::io::AsyncReadExt as _;
	use tokio::net::TcpListener;

	async fn listen() -> (TcpListener, Url) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let port = listener.local_addr().unwrap().port();
		let url = Url::parse(&format!("http://127.0.0.1:{port}/path")).unwrap();
		(listener, url)
	}

	/// Tests that a plain connection carries bytes both ways.
	#[tokio::test]
	async fn test_tcp_agent() {
		let (listener, url) = listen().await;
		let mut socket = TcpAgent::new().connect(&url).await.unwrap();
		let (mut server, _) = listener.accept().await.unwrap();
		Pin::new(&mut socket).write_all(b"ping").await.unwrap();
		Pin::new(&mut socket).flush().await.unwrap();
		let mut received = [0_u8; 4];
		let _ = server.read_exact(&mut received).await.unwrap();
		assert_eq!(&received, b"ping");
		tokio::io::AsyncWriteExt::write_all(&mut server, b"pong")
			.await
			.unwrap();
		let got = Pin::new(&mut socket)
			.read_buf(|bytes: &[u8]| (bytes.len(), bytes.to_vec()))
			.await
			.unwrap();
		assert!(b"pong".starts_with(&got) && !got.is_empty());
	}

	/// Tests that schemes other than HTTP are refused.
	#[tokio::test]
	async fn test_bad_scheme() {
		let url = Url::parse("ftp://127.0.0.1/").unwrap();
		let e = TcpAgent::new().connect(&url).await.err().unwrap();
		assert_eq!(e.kind(), ErrorKind::InvalidInput);
	}

	/// Tests that a recycled connection is handed out again instead of opening a new one.
	#[tokio::test]
	async fn test_keep_alive_reuse() {
		let (listener, url) = listen().await;
		let agent = KeepAliveAgent::new();
		let socket = agent.connect(&url).await.unwrap();
		let _server = listener.accept().await.unwrap();
		agent.recycle(&url, socket);
		assert_eq!(agent.idle_connections(), 1);

		// Same origin, different path.
		let other = url.join("/elsewhere").unwrap();
		let _socket = agent.connect(&other).await.unwrap();
		assert_eq!(agent.idle_connections(), 0);
		assert!(
			tokio::time::timeout(Duration::from_millis(50), listener.accept())
				.await
				.is_err()
		);
	}

	/// Tests that an idle connection closed by the server is replaced by a new one.
	#[tokio::test]
	async fn test_keep_alive_closed() {
		let (listener, url) = listen().await;
		let agent = KeepAliveAgent::new();
		let socket = agent.connect(&url).await.unwrap();
		let (server, _) = listener.accept().await.unwrap();
		agent.recycle(&url, socket);
		drop(server);
		tokio::time::sleep(Duration::from_millis(50)).await;

		let _socket = agent.connect(&url).await.unwrap();
		assert_eq!(agent.idle_connections(), 0);
		assert!(
			tokio::time::timeout(Duration::from_secs(5), listener.accept())
				.await
				.is_ok()
		);
	}

	/// Tests that the number of idle connections per origin is capped.
	#[tokio::test]
	async fn test_keep_alive_cap() {
		let (listener, url) = listen().await;
		let agent = KeepAliveAgent::with_max_idle(1);
		let first = agent.connect(&url).await.unwrap();
		let second = agent.connect(&url).await.unwrap();
		let _a = listener.accept().await.unwrap();
		let _b = listener.accept().await.unwrap();
		agent.recycle(&url, first);
		agent.recycle(&url, second);
		assert_eq!(agent.idle_connections(), 1);
	}
}
