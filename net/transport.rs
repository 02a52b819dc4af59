// Copyright 2018-2026 the Deno authors. MIT license.

use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::duplex::DuplexIo;
#[cfg(windows)]
use crate::pipe::PipeStream;

/// The concrete byte-stream underlying a `ConnectionEngine`, unifying the
/// platform transport variants (spec.md §4.7, §4.6) behind one
/// `AsyncRead + AsyncWrite` so `ConnectionEngine` and `TlsLayer` need not be
/// generic over every possible socket kind.
pub enum RawTransport {
  Tcp(TcpStream),
  #[cfg(unix)]
  Unix(UnixStream),
  #[cfg(windows)]
  Pipe(PipeStream),
  /// Backs `DuplexBridge`: an external, user-provided duplex stream
  /// adapted into this surface (spec.md §4.6).
  Duplex(DuplexIo),
}

impl RawTransport {
  pub fn local_fd(&self) -> Option<i32> {
    #[cfg(unix)]
    {
      use std::os::fd::AsRawFd;
      return match self {
        RawTransport::Tcp(s) => Some(s.as_raw_fd()),
        RawTransport::Unix(s) => Some(s.as_raw_fd()),
        RawTransport::Duplex(_) => None,
      };
    }
    #[cfg(not(unix))]
    {
      None
    }
  }

  pub fn set_nodelay(&self, nodelay: bool) -> std::io::Result<()> {
    match self {
      RawTransport::Tcp(s) => s.set_nodelay(nodelay),
      _ => Ok(()),
    }
  }
}

impl AsyncRead for RawTransport {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
    unsafe {
      match self.get_unchecked_mut() {
        RawTransport::Tcp(s) => Pin::new_unchecked(s).poll_read(cx, buf),
        #[cfg(unix)]
        RawTransport::Unix(s) => Pin::new_unchecked(s).poll_read(cx, buf),
        #[cfg(windows)]
        RawTransport::Pipe(s) => Pin::new_unchecked(s).poll_read(cx, buf),
        RawTransport::Duplex(s) => Pin::new_unchecked(s).poll_read(cx, buf),
      }
    }
  }
}

impl AsyncWrite for RawTransport {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<std::io::Result<usize>> {
    unsafe {
      match self.get_unchecked_mut() {
        RawTransport::Tcp(s) => Pin::new_unchecked(s).poll_write(cx, data),
        #[cfg(unix)]
        RawTransport::Unix(s) => Pin::new_unchecked(s).poll_write(cx, data),
        #[cfg(windows)]
        RawTransport::Pipe(s) => Pin::new_unchecked(s).poll_write(cx, data),
        RawTransport::Duplex(s) => Pin::new_unchecked(s).poll_write(cx, data),
      }
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    unsafe {
      match self.get_unchecked_mut() {
        RawTransport::Tcp(s) => Pin::new_unchecked(s).poll_flush(cx),
        #[cfg(unix)]
        RawTransport::Unix(s) => Pin::new_unchecked(s).poll_flush(cx),
        #[cfg(windows)]
        RawTransport::Pipe(s) => Pin::new_unchecked(s).poll_flush(cx),
        RawTransport::Duplex(s) => Pin::new_unchecked(s).poll_flush(cx),
      }
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    unsafe {
      match self.get_unchecked_mut() {
        RawTransport::Tcp(s) => Pin::new_unchecked(s).poll_shutdown(cx),
        #[cfg(unix)]
        RawTransport::Unix(s) => Pin::new_unchecked(s).poll_shutdown(cx),
        #[cfg(windows)]
        RawTransport::Pipe(s) => Pin::new_unchecked(s).poll_shutdown(cx),
        RawTransport::Duplex(s) => Pin::new_unchecked(s).poll_shutdown(cx),
      }
    }
  }
}
