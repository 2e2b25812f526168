use crate::body::Payload;
use crate::util::io::{AsyncReadExt as _, AsyncWriteExt as _};
use futures_io::AsyncWrite;
use std::io::{Error, ErrorKind, Result};
use std::pin::Pin;

/// The size of the buffer used to copy a streamed body, and thus the largest chunk sent.
const COPY_BUFFER: usize = 16 * 1024;

/// How a request body is delimited on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Framing {
	/// The body has a length known before sending, given by `Content-Length` (or implied zero).
	Fixed(u64),

	/// The body is sent with chunked transfer coding.
	Chunked,
}

impl Framing {
	/// Chooses the framing for a payload.
	///
	/// A stream of unknown length is chunked; everything else has a fixed length.
	pub(crate) fn of(payload: Option<&Payload>) -> Self {
		match payload {
			None => Self::Fixed(0),
			Some(Payload::Buffer(bytes)) => Self::Fixed(bytes.len() as u64),
			Some(Payload::Stream(_, Some(length))) => Self::Fixed(*length),
			Some(Payload::Stream(_, None)) => Self::Chunked,
		}
	}
}

/// Sends a request body and flushes the socket.
///
/// With [`Framing::Fixed`], a streamed payload must produce exactly the declared number of bytes.
/// With [`Framing::Chunked`], each read from the stream becomes one chunk, followed by the
/// terminating zero-length chunk.
///
/// # Errors
/// This function returns an error if reading the payload or writing to `socket` fails, or if a
/// fixed-length stream produces more or fewer bytes than declared.
pub(crate) async fn send<Socket: AsyncWrite + ?Sized>(
	payload: Option<Payload>,
	framing: Framing,
	mut socket: Pin<&mut Socket>,
) -> Result<()> {
	match payload {
		None => (),
		Some(Payload::Buffer(bytes)) => socket.as_mut().write_all(&bytes).await?,
		Some(Payload::Stream(mut reader, _)) => {
			let mut buffer = vec![0_u8; COPY_BUFFER];
			let mut sent: u64 = 0;
			loop {
				let bytes_read = reader.as_mut().read(&mut buffer).await?;
				let data = &buffer[..bytes_read];
				match framing {
					Framing::Fixed(length) => {
						if bytes_read == 0 {
							if sent != length {
								return Err(Error::new(
									ErrorKind::UnexpectedEof,
									format!("request body ended after {sent} of {length} bytes"),
								));
							}
							break;
						}
						sent += bytes_read as u64;
						if sent > length {
							return Err(Error::new(
								ErrorKind::InvalidInput,
								format!("request body is longer than its declared {length} bytes"),
							));
						}
						socket.as_mut().write_all(data).await?;
					}
					Framing::Chunked => {
						if bytes_read == 0 {
							socket.as_mut().write_all(b"0\r\n\r\n").await?;
							break;
						}
						sent += bytes_read as u64;
						let header = format!("{bytes_read:X}\r\n");
						socket.as_mut().write_all(header.as_bytes()).await?;
						socket.as_mut().write_all(data).await?;
						socket.as_mut().write_all(b"\r\n").await?;
					}
				}
			}
			tracing::trace!(bytes = sent, ?framing, "sent streamed request body");
		}
	}
	socket.as_mut().flush().await
}
