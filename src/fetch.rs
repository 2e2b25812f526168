use crate::agent::{Agent, BoxSocket, TcpAgent};
use crate::body::{Body, BodyLimits, BoxRead, HasBody as _};
use crate::decode::{decode, DecodeContext};
use crate::error::{ErrorKind, FetchError};
use crate::local;
use crate::redirect;
use crate::request::{self, send_body, send_headers, Input, Request, RequestInit, TransportOptions};
use crate::response::{receive_head, Head, Receive, Recycler, Response};
use std::pin::Pin;
use std::sync::Arc;

/// Performs a fetch.
///
/// The `input` parameter is the URL to fetch, or a [`Request`] to base the fetch on; `init`
/// supplies or overrides the request’s method, headers, body and settings.
///
/// `data:` and `file:` URLs are answered locally. For `http:` and `https:` URLs, the request is
/// sent over a connection from the request’s agent (or a new [`TcpAgent`] if there is none), and
/// redirects are handled according to the request’s [`RedirectMode`](crate::RedirectMode). The
/// returned response’s body has not been read yet; it is read through the [`HasBody`] methods.
///
/// If a timeout is set, it bounds each hop from the moment the connection is established until
/// the response head has been received, and separately bounds reading the body.
///
/// # Errors
/// This function returns an error of kind:
/// * [`InvalidInput`](ErrorKind::InvalidInput) if the request cannot be built
/// * [`System`](ErrorKind::System) if connecting, sending the request, or receiving the response
///   head fails, including when the server sends a malformed response
/// * [`RequestTimeout`](ErrorKind::RequestTimeout) if a hop exceeds the timeout
/// * [`NoRedirect`](ErrorKind::NoRedirect), [`MaxRedirect`](ErrorKind::MaxRedirect),
///   [`InvalidRedirect`](ErrorKind::InvalidRedirect) or
///   [`UnsupportedRedirect`](ErrorKind::UnsupportedRedirect) if a redirect cannot be followed
///
/// [`HasBody`]: crate::HasBody
pub async fn fetch(input: impl Into<Input>, init: RequestInit) -> Result<Response, FetchError> {
	let mut request = Request::new(input, init)?;
	match request.url().scheme() {
		"data" => return local::data(&request),
		"file" => return local::file(&request).await,
		_ => (),
	}

	loop {
		let options = TransportOptions::new(&request)?;
		let agent: Arc<dyn Agent> = match request.agent() {
			Some(agent) => Arc::clone(agent),
			None => Arc::new(TcpAgent::new()),
		};
		let url = request.url().clone();
		tracing::debug!(
			%url,
			method = %options.method,
			counter = request.counter(),
			"sending request"
		);

		let socket = match agent.connect(&options.url).await {
			Ok(socket) => socket,
			Err(e) => return Err(transport_error(&url, e)),
		};
		let outcome = match request.timeout() {
			None => Ok(exchange(socket, &mut request, &options).await),
			Some(limit) => {
				tokio::time::timeout(limit, exchange(socket, &mut request, &options)).await
			}
		};
		let (socket, head) = match outcome {
			Ok(Ok(pair)) => pair,
			Ok(Err(e)) => return Err(transport_error(&url, e)),
			Err(_) => {
				tracing::debug!(%url, "request timed out");
				return Err(FetchError::new(
					ErrorKind::RequestTimeout,
					format!("network timeout at: {url}"),
				));
			}
		};

		let Head {
			minor_version,
			status,
			reason,
			mut headers,
			framing,
			persistent,
		} = head;
		if let Some(next) = redirect::resolve(&request, status, &mut headers)? {
			// The redirect response’s body is never read, so the connection cannot be reused.
			drop(socket);
			request = next;
			continue;
		}
		tracing::debug!(%url, status, minor_version, persistent, "received response");

		let raw: BoxRead = Box::pin(Receive::new(
			socket,
			framing,
			persistent,
			Some(Recycler {
				agent,
				url: url.clone(),
			}),
		));
		let context = DecodeContext {
			method: request.method().clone(),
			compress: request.compress(),
			status,
		};
		let body = decode(&headers, raw, &context).map_err(FetchError::io)?;
		return Ok(Response::new(
			url,
			status,
			reason,
			headers,
			Body::from_boxed_reader(body, None),
			request.counter(),
			BodyLimits {
				size: request.size(),
				timeout: request.timeout(),
			},
		));
	}
}

/// Carries out one request-response exchange over a connected socket, up to the end of the
/// response head.
///
/// Returns the socket, positioned at the start of the response body, and the response head.
async fn exchange(
	mut socket: BoxSocket,
	request: &mut Request,
	options: &TransportOptions,
) -> std::io::Result<(BoxSocket, Head)> {
	let payload = request.body_mut().and_then(Body::payload);
	let framing = request::Framing::of(payload.as_ref());
	let metadata = send_headers(options, framing, Pin::new(&mut socket)).await?;
	send_body(payload, framing, Pin::new(&mut socket)).await?;
	let head = receive_head(Pin::new(&mut socket), metadata).await?;
	Ok((socket, head))
}

/// Reports a failure to connect or to carry out an exchange.
fn transport_error(url: &url::Url, e: std::io::Error) -> FetchError {
	tracing::debug!(%url, error = %e, "request failed");
	FetchError::with_cause(
		ErrorKind::System,
		format!("request to {url} failed, reason: {e}"),
		e,
	)
}
