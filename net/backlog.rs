// Copyright 2018-2026 the Deno authors. MIT license.

/// Bytes accepted by a `ConnectionEngine` but not yet transmitted
/// (spec.md §3 `writeBacklog`, I2). Plain `Vec<u8>`-backed: this crate
/// favors a straightforward FIFO byte buffer over a `VecDeque` of chunks
/// since the write contract (§4.3) always drains front-to-back and never
/// needs to address individual chunk boundaries once queued.
#[derive(Debug, Default)]
pub struct WriteBacklog {
  buf: Vec<u8>,
}

impl WriteBacklog {
  pub fn new() -> Self {
    Self { buf: Vec::new() }
  }

  pub fn len(&self) -> usize {
    self.buf.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }

  /// Appends `data` to the tail of the backlog.
  pub fn push(&mut self, data: &[u8]) {
    self.buf.extend_from_slice(data);
  }

  /// Drops the first `n` bytes, which the caller has confirmed were
  /// transmitted.
  pub fn consume(&mut self, n: usize) {
    debug_assert!(n <= self.buf.len());
    self.buf.drain(0..n);
  }

  pub fn as_slice(&self) -> &[u8] {
    &self.buf
  }

  pub fn clear(&mut self) {
    self.buf.clear();
  }
}

/// Decides how to present `backlog` and a freshly-submitted `new` write to
/// a single transmit attempt (spec.md §4.3: "backlog bytes are always
/// sent before new bytes; TCP platforms attempt a single gathered write
/// combining backlog+new to avoid a copy, falling back to append-then-write
/// otherwise"). `tokio`'s `AsyncWrite` has no public vectored-write seam
/// that lets us avoid the copy the way a raw `writev(2)` call would, so
/// this crate always takes the append-then-write path; `Combined::Single`
/// is retained as the shape a transport with real vectored-write support
/// (a raw fd via `IoSlice`) could take to skip the copy.
pub enum Combined<'a> {
  /// Backlog is empty; `new` can be written as-is.
  JustNew(&'a [u8]),
  /// Backlog is non-empty; the two have been copied into one buffer.
  Appended(Vec<u8>),
}

pub fn combine<'a>(backlog: &WriteBacklog, new: &'a [u8]) -> Combined<'a> {
  if backlog.is_empty() {
    Combined::JustNew(new)
  } else {
    let mut out = Vec::with_capacity(backlog.len() + new.len());
    out.extend_from_slice(backlog.as_slice());
    out.extend_from_slice(new);
    Combined::Appended(out)
  }
}

impl<'a> Combined<'a> {
  pub fn as_slice(&self) -> &[u8] {
    match self {
      Combined::JustNew(s) => s,
      Combined::Appended(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn push_and_consume() {
    let mut b = WriteBacklog::new();
    b.push(b"hello");
    assert_eq!(b.len(), 5);
    b.consume(2);
    assert_eq!(b.as_slice(), b"llo");
  }

  #[test]
  fn combine_empty_backlog_avoids_copy() {
    let b = WriteBacklog::new();
    let combined = combine(&b, b"abc");
    assert!(matches!(combined, Combined::JustNew(_)));
    assert_eq!(combined.as_slice(), b"abc");
  }

  #[test]
  fn combine_nonempty_backlog_appends() {
    let mut b = WriteBacklog::new();
    b.push(b"ab");
    let combined = combine(&b, b"cd");
    assert_eq!(combined.as_slice(), b"abcd");
  }
}
