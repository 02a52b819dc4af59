// Copyright 2018-2026 the Deno authors. MIT license.

use std::fmt;

/// An ordered list of ALPN protocol identifiers, wire-encoded as
/// length-prefixed byte strings the way `rustls::ClientConfig::alpn_protocols`
/// and `ServerConfig::alpn_protocols` expect them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlpnProtocols(pub Vec<Vec<u8>>);

impl AlpnProtocols {
  pub fn new(protos: Vec<Vec<u8>>) -> Self {
    Self(protos)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn as_rustls(&self) -> Vec<Vec<u8>> {
    self.0.clone()
  }

  /// Server-side ALPN selection, mirroring `SSL_select_next_proto`: walk
  /// the client's offered list in the client's preference order and
  /// return the first entry that also appears in our configured list.
  ///
  /// Unlike `SSL_select_next_proto`'s classic OpenSSL behavior of falling
  /// back to the first of our own protocols on a mismatch, a server with
  /// no match must fail the handshake with a fatal `no_application_protocol`
  /// alert (RFC 7301 §3.2) rather than silently proceeding unnegotiated.
  pub fn select(&self, offered: &[Vec<u8>]) -> Result<Vec<u8>, NoApplicationProtocol> {
    for candidate in offered {
      if self.0.iter().any(|p| p == candidate) {
        return Ok(candidate.clone());
      }
    }
    Err(NoApplicationProtocol)
  }
}

/// RFC 7301 §3.2: the server found no overlap between the offered and
/// configured protocol lists and must terminate the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoApplicationProtocol;

impl fmt::Display for NoApplicationProtocol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "no_application_protocol")
  }
}

impl std::error::Error for NoApplicationProtocol {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn selects_first_client_preference_present_on_server() {
    let server = AlpnProtocols::new(vec![b"http/1.1".to_vec(), b"h2".to_vec()]);
    let offered = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    assert_eq!(server.select(&offered).unwrap(), b"h2");
  }

  #[test]
  fn no_overlap_is_fatal() {
    let server = AlpnProtocols::new(vec![b"h2".to_vec()]);
    let offered = vec![b"http/1.1".to_vec()];
    assert_eq!(server.select(&offered), Err(NoApplicationProtocol));
  }

  #[test]
  fn empty_offer_is_fatal() {
    let server = AlpnProtocols::new(vec![b"h2".to_vec()]);
    assert!(server.select(&[]).is_err());
  }
}
