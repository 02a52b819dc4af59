// Copyright 2018-2026 the Deno authors. MIT license.

use rustls::pki_types::CertificateDer;
use sha2::Digest;
use sha2::Sha256;

/// A peer (or local) certificate as surfaced by `getPeerCertificate()` /
/// `getCertificate()` / `getPeerX509Certificate()` / `getX509Certificate()`.
///
/// X.509 field parsing (subject, issuer, validity, SANs) is an external
/// collaborator per spec.md §1 — this type carries the raw DER chain plus
/// the one fact this layer can compute on its own (a SHA-256 fingerprint,
/// useful for pinning without a parser). A host wiring this into a script
/// runtime is expected to hand `raw()` to its own X.509 parser for the
/// abbreviated/full object shape `getPeerCertificate(abbrev?)` returns.
#[derive(Debug, Clone)]
pub struct PeerCertificate {
  chain: Vec<CertificateDer<'static>>,
}

impl PeerCertificate {
  pub fn from_chain(chain: Vec<CertificateDer<'static>>) -> Option<Self> {
    if chain.is_empty() { None } else { Some(Self { chain }) }
  }

  /// The leaf (end-entity) certificate, DER-encoded.
  pub fn raw(&self) -> &[u8] {
    self.chain[0].as_ref()
  }

  /// Full chain as presented by the peer, leaf first.
  pub fn chain(&self) -> &[CertificateDer<'static>] {
    &self.chain
  }

  pub fn fingerprint_sha256(&self) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(self.raw());
    hasher.finalize().into()
  }

  pub fn fingerprint_sha256_hex(&self) -> String {
    self.fingerprint_sha256().iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":")
  }
}

/// `getCipher()` return shape: `{name, standardName, version}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherInfo {
  pub name: String,
  pub standard_name: String,
  pub version: String,
}

/// One entry of `getSharedSigalgs()`, formatted as `"SIG+HASH"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigAlg {
  pub signature: String,
  pub hash: String,
}

impl SigAlg {
  pub fn label(&self) -> String {
    format!("{}+{}", self.signature, self.hash)
  }
}

/// `getEphemeralKeyInfo()` return shape: DH/ECDH parameters used for the
/// ephemeral key exchange, when the negotiated cipher suite used one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralKeyInfo {
  pub kind: EphemeralKeyKind,
  pub name: Option<String>,
  pub bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EphemeralKeyKind {
  Dh,
  Ecdh,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_chain_yields_no_certificate() {
    assert!(PeerCertificate::from_chain(vec![]).is_none());
  }

  #[test]
  fn fingerprint_is_stable() {
    let der = CertificateDer::from(vec![9u8; 16]);
    let cert = PeerCertificate::from_chain(vec![der]).unwrap();
    let fp1 = cert.fingerprint_sha256();
    let fp2 = cert.fingerprint_sha256();
    assert_eq!(fp1, fp2);
  }
}
