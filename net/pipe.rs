// Copyright 2018-2026 the Deno authors. MIT license.
//
// Windows named pipe variant (spec.md §4.7). "Pipe names are detected by
// prefix and routed through a native named-pipe listener/connector instead
// of the generic socket context... the public ConnectionEngine API is
// identical." Compiled only on Windows; `Endpoint::pipe` validation itself
// stays platform-independent so construction-time errors are uniform.

use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio::net::windows::named_pipe::ClientOptions;
use tokio::net::windows::named_pipe::NamedPipeClient;
use tokio::net::windows::named_pipe::NamedPipeServer;
use tokio::net::windows::named_pipe::ServerOptions;

use crate::error::NetError;

/// Unifies the client and server halves of a named pipe connection behind
/// one `AsyncRead + AsyncWrite`, the same role `RawTransport`'s other
/// variants play for TCP/UNIX.
pub enum PipeStream {
  Client(NamedPipeClient),
  Server(NamedPipeServer),
}

impl PipeStream {
  pub async fn connect(name: &str) -> Result<Self, NetError> {
    let client = ClientOptions::new()
      .open(name)
      .map_err(|e| NetError::from_connect_io("connect", &e, Some(name.to_string()), None))?;
    Ok(PipeStream::Client(client))
  }
}

/// Owns the next pipe instance to be accepted (§4.7): each
/// `NamedPipeServer` serves exactly one client, so the listener keeps one
/// spare instance created and waiting at all times, swapping in a fresh
/// one the moment the current one connects.
pub struct PipeListener {
  name: String,
  next: Option<NamedPipeServer>,
}

impl PipeListener {
  pub fn bind(name: &str) -> Result<Self, NetError> {
    let server = ServerOptions::new()
      .first_pipe_instance(true)
      .create(name)
      .map_err(|e| NetError::from_connect_io("listen", &e, Some(name.to_string()), None))?;
    Ok(Self { name: name.to_string(), next: Some(server) })
  }

  /// Waits for the next client to connect, then immediately opens a fresh
  /// pipe instance to replace it so a following `accept` has something to
  /// wait on (each `NamedPipeServer` instance serves exactly one client).
  pub async fn accept(&mut self) -> Result<PipeStream, NetError> {
    let server = self.next.take().expect("PipeListener polled after exhaustion");
    server
      .connect()
      .await
      .map_err(|e| NetError::from_connect_io("accept", &e, Some(self.name.clone()), None))?;
    self.next = Some(
      ServerOptions::new()
        .create(&self.name)
        .map_err(|e| NetError::from_connect_io("listen", &e, Some(self.name.clone()), None))?,
    );
    Ok(PipeStream::Server(server))
  }
}

impl AsyncRead for PipeStream {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
    unsafe {
      match self.get_unchecked_mut() {
        PipeStream::Client(s) => Pin::new_unchecked(s).poll_read(cx, buf),
        PipeStream::Server(s) => Pin::new_unchecked(s).poll_read(cx, buf),
      }
    }
  }
}

impl AsyncWrite for PipeStream {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<std::io::Result<usize>> {
    unsafe {
      match self.get_unchecked_mut() {
        PipeStream::Client(s) => Pin::new_unchecked(s).poll_write(cx, data),
        PipeStream::Server(s) => Pin::new_unchecked(s).poll_write(cx, data),
      }
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    unsafe {
      match self.get_unchecked_mut() {
        PipeStream::Client(s) => Pin::new_unchecked(s).poll_flush(cx),
        PipeStream::Server(s) => Pin::new_unchecked(s).poll_flush(cx),
      }
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    unsafe {
      match self.get_unchecked_mut() {
        PipeStream::Client(s) => Pin::new_unchecked(s).poll_shutdown(cx),
        PipeStream::Server(s) => Pin::new_unchecked(s).poll_shutdown(cx),
      }
    }
  }
}
