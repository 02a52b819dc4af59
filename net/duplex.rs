// Copyright 2018-2026 the Deno authors. MIT license.

use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;

/// The seam a caller's own duplex stream plugs into (spec.md §4.6:
/// "adapts an external user-provided duplex stream ... into a virtual
/// transport implementing the TLS library's I/O callbacks"). Any
/// `AsyncRead + AsyncWrite` type qualifies; the host-scripting-runtime
/// notion of a duplex object with `read`/`write`/`end`/`on-data` events is
/// the out-of-scope layer that would adapt a script-level stream into one
/// of these before handing it to `upgrade_duplex`.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// A boxed, type-erased duplex stream, stored inside `RawTransport::Duplex`
/// so `ConnectionEngine`/`TlsLayer` need not be generic over the caller's
/// concrete stream type.
pub struct DuplexIo {
  inner: Pin<Box<dyn AsyncReadWrite>>,
}

impl DuplexIo {
  pub fn new<T: AsyncRead + AsyncWrite + 'static>(stream: T) -> Self {
    Self { inner: Box::pin(stream) }
  }
}

impl AsyncRead for DuplexIo {
  fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
    self.inner.as_mut().poll_read(cx, buf)
  }
}

impl AsyncWrite for DuplexIo {
  fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<std::io::Result<usize>> {
    self.inner.as_mut().poll_write(cx, data)
  }

  fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    self.inner.as_mut().poll_flush(cx)
  }

  fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    self.inner.as_mut().poll_shutdown(cx)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::AsyncReadExt;
  use tokio::io::AsyncWriteExt;
  use tokio::io::duplex;

  #[tokio::test]
  async fn forwards_reads_and_writes() {
    let (a, mut b) = duplex(64);
    let mut wrapped = DuplexIo::new(a);
    b.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    wrapped.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    wrapped.write_all(b"pong").await.unwrap();
    let mut reply = [0u8; 4];
    b.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"pong");
  }
}
