// Copyright 2018-2026 the Deno authors. MIT license.

/// Opaque session ticket, round-tripped through `getSession()`/`setSession()`.
/// Encoding is whatever rustls's own serialized client session value is;
/// the core never inspects the bytes, only stores and replays them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket(pub Vec<u8>);

impl SessionTicket {
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl From<Vec<u8>> for SessionTicket {
  fn from(bytes: Vec<u8>) -> Self {
    Self(bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_opaque_bytes() {
    let t = SessionTicket::from(vec![1, 2, 3]);
    assert_eq!(t.as_bytes(), &[1, 2, 3]);
  }
}
