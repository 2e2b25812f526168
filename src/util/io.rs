use futures_core::ready;
use futures_io::{AsyncBufRead, AsyncRead, AsyncWrite};
use std::future::Future;
use std::io::Result;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A set of additional utility functions available on any type implementing `AsyncBufRead`.
pub trait AsyncBufReadExt: AsyncBufRead {
	/// Fills the internal buffer, then invokes a callback which can consume some bytes from that
	/// buffer.
	///
	/// This function adapts the `poll_fill_buf` and `consume` methods into a proper future.
	///
	/// The callback is called at most once per call to `read_buf` (it is not called at all if an
	/// error occurs). It is passed the bytes in the buffer, which are empty at end of input. Its
	/// return value identifies how many bytes to consume from the buffer, along with an arbitrary
	/// value to pass back to the caller of `read_buf`.
	fn read_buf<CallbackReturn, Callback: FnOnce(&'_ [u8]) -> (usize, CallbackReturn) + Unpin>(
		self: Pin<&mut Self>,
		callback: Callback,
	) -> ReadBufFuture<'_, Self, CallbackReturn, Callback> {
		ReadBufFuture {
			source: self,
			callback: Some(callback),
		}
	}
}

impl<R: AsyncBufRead + ?Sized> AsyncBufReadExt for R {}

/// A set of additional utility functions available on any type implementing `AsyncRead`.
pub trait AsyncReadExt: AsyncRead {
	/// Reads data to a caller-provided buffer.
	fn read<'buffer>(
		self: Pin<&mut Self>,
		buffer: &'buffer mut [u8],
	) -> ReadFuture<'_, 'buffer, Self> {
		ReadFuture {
			source: self,
			buffer,
		}
	}
}

impl<R: AsyncRead + ?Sized> AsyncReadExt for R {}

/// A set of additional utility functions available on any type implementing `AsyncWrite`.
pub trait AsyncWriteExt: AsyncWrite {
	/// Writes a block of bytes to the writeable.
	///
	/// This function performs repeated writes into the writeable until the entire requested data
	/// has been written.
	fn write_all<'a>(self: Pin<&'a mut Self>, data: &'a [u8]) -> WriteAllFuture<'a, Self> {
		WriteAllFuture { sink: self, data }
	}

	/// Flushes any data buffered in the writeable.
	fn flush(self: Pin<&mut Self>) -> FlushFuture<'_, Self> {
		FlushFuture { sink: self }
	}
}

impl<W: AsyncWrite + ?Sized> AsyncWriteExt for W {}

/// A future that fills an `AsyncBufRead`’s internal buffer and then invokes a callback to consume
/// some or all of the data.
#[derive(Debug)]
pub struct ReadBufFuture<
	'source,
	Source: AsyncBufRead + ?Sized,
	CallbackReturn,
	Callback: FnOnce(&[u8]) -> (usize, CallbackReturn) + Unpin,
> {
	source: Pin<&'source mut Source>,
	callback: Option<Callback>,
}

impl<
		Source: AsyncBufRead + ?Sized,
		CallbackReturn,
		Callback: FnOnce(&[u8]) -> (usize, CallbackReturn) + Unpin,
	> Future for ReadBufFuture<'_, Source, CallbackReturn, Callback>
{
	type Output = Result<CallbackReturn>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		let data = ready!(this.source.as_mut().poll_fill_buf(cx))?;
		let callback = this
			.callback
			.take()
			.expect("ReadBufFuture polled after completion");
		let (consumed, ret) = callback(data);
		this.source.as_mut().consume(consumed);
		Ok(ret).into()
	}
}

/// A future that reads from an `AsyncRead` into a single caller-provided buffer.
#[derive(Debug)]
pub struct ReadFuture<'source, 'buffer, Source: AsyncRead + ?Sized> {
	source: Pin<&'source mut Source>,
	buffer: &'buffer mut [u8],
}

impl<Source: AsyncRead + ?Sized> Future for ReadFuture<'_, '_, Source> {
	type Output = Result<usize>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		this.source.as_mut().poll_read(cx, this.buffer)
	}
}

/// A future that writes all of an array to an `AsyncWrite`.
#[derive(Debug)]
pub struct WriteAllFuture<'a, T: AsyncWrite + ?Sized> {
	sink: Pin<&'a mut T>,
	data: &'a [u8],
}

impl<T: AsyncWrite + ?Sized> Future for WriteAllFuture<'_, T> {
	type Output = Result<()>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		while !self.data.is_empty() {
			let data = self.data;
			let bytes_written = ready!(self.sink.as_mut().poll_write(cx, data))?;
			if bytes_written == 0 {
				return Err(std::io::ErrorKind::WriteZero.into()).into();
			}
			self.data = &self.data[bytes_written..];
		}
		Ok(()).into()
	}
}

/// A future that flushes an `AsyncWrite`.
#[derive(Debug)]
pub struct FlushFuture<'a, T: AsyncWrite + ?Sized> {
	sink: Pin<&'a mut T>,
}

impl<T: AsyncWrite + ?Sized> Future for FlushFuture<'_, T> {
	type Output = Result<()>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		self.sink.as_mut().poll_flush(cx)
	}
}

/// Reads from a source until end of input, appending everything to `sink`.
#[cfg(test)]
pub async fn read_to_end<Source: AsyncRead + ?Sized>(
	mut src: Pin<&mut Source>,
	sink: &mut Vec<u8>,
) -> Result<()> {
	let mut buffer = [0_u8; 512];
	loop {
		let bytes_read = src.as_mut().read(&mut buffer).await?;
		if bytes_read == 0 {
			return Ok(());
		}
		sink.extend_from_slice(&buffer[..bytes_read]);
	}
}
