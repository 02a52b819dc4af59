// Copyright 2018-2026 the Deno authors. MIT license.

use crate::error::NetError;

/// How inbound bytes are materialised for the `data` callback
/// (`HandlerSet::binary_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryType {
  ArrayBuffer,
  #[default]
  Uint8Array,
  Buffer,
}

impl BinaryType {
  pub fn parse(s: &str) -> Result<Self, NetError> {
    match s {
      "arraybuffer" => Ok(BinaryType::ArrayBuffer),
      "uint8array" => Ok(BinaryType::Uint8Array),
      "buffer" => Ok(BinaryType::Buffer),
      other => Err(NetError::invalid_arguments(format!("unknown binaryType: {other}"))),
    }
  }
}

/// Text encoding tag accompanying a `WritePayload`, mirroring the small set
/// of encodings a `write(data, encoding)` call can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
  Utf8,
  Latin1,
  Hex,
  Base64,
}

/// Bytes handed to `write`/`writeBuffered`/`end`, plus an optional
/// `(offset, length)` window. Per spec.md §3: rejected if `encoding` is set
/// alongside `offset`/`length` — those two ways of slicing the payload are
/// mutually exclusive.
#[derive(Debug, Clone)]
pub struct WritePayload {
  data: Vec<u8>,
  window: Option<(usize, usize)>,
  encoding: Option<Encoding>,
}

impl WritePayload {
  pub fn new(data: Vec<u8>) -> Self {
    Self { data, window: None, encoding: None }
  }

  pub fn with_window(data: Vec<u8>, offset: usize, length: usize) -> Result<Self, NetError> {
    if offset.checked_add(length).map(|end| end > data.len()).unwrap_or(true) {
      return Err(NetError::invalid_arguments("offset/length out of bounds"));
    }
    Ok(Self { data, window: Some((offset, length)), encoding: None })
  }

  pub fn with_encoding(data: Vec<u8>, encoding: Encoding) -> Self {
    Self { data, window: None, encoding: Some(encoding) }
  }

  /// Validates the encoding-vs-window exclusivity rule and returns the
  /// final byte slice this payload represents.
  pub fn resolve(&self) -> Result<&[u8], NetError> {
    if self.encoding.is_some() && self.window.is_some() {
      return Err(NetError::invalid_arguments("encoding cannot be combined with offset/length"));
    }
    match self.window {
      Some((offset, length)) => Ok(&self.data[offset..offset + length]),
      None => Ok(&self.data),
    }
  }

  pub fn len(&self) -> usize {
    match self.window {
      Some((_, length)) => length,
      None => self.data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_encoding_with_window() {
    let mut p = WritePayload::with_encoding(vec![1, 2, 3], Encoding::Utf8);
    p.window = Some((0, 1));
    assert!(p.resolve().is_err());
  }

  #[test]
  fn window_out_of_bounds_rejected() {
    assert!(WritePayload::with_window(vec![1, 2, 3], 2, 5).is_err());
  }

  #[test]
  fn plain_payload_resolves_whole_buffer() {
    let p = WritePayload::new(vec![1, 2, 3]);
    assert_eq!(p.resolve().unwrap(), &[1, 2, 3]);
    assert_eq!(p.len(), 3);
  }

  #[test]
  fn empty_payload_is_empty() {
    let p = WritePayload::new(vec![]);
    assert!(p.is_empty());
  }
}
