// Copyright 2018-2026 the Deno authors. MIT license.

use std::collections::HashMap;
use std::io::BufReader;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::PrivateKeyDer;
use rustls::pki_types::ServerName;
use rustls::server::ClientHello;
use rustls::server::ResolvesServerCert;
use rustls::server::ServerSessionMemoryCache;
use rustls::sign::CertifiedKey;

use crate::alpn::AlpnProtocols;
use crate::error::TlsError;

const DEFAULT_SESSION_CACHE_SIZE: usize = 256;

/// Either side of an `SslConfig` passed in on a `SocketConfig`/listen call:
/// `tls: true` (use host defaults) or a full PEM-backed configuration.
#[derive(Clone)]
pub enum SslConfig {
  /// `tls: true` with no further detail; only meaningful client-side,
  /// using the platform root store.
  Default,
  Client(ClientSslConfig),
  Server(ServerSslConfig),
}

/// Client-side TLS configuration: root store, optional client certificate
/// (mutual TLS), ALPN offer list, SNI override, verification toggle.
#[derive(Clone)]
pub struct ClientSslConfig {
  inner: Arc<rustls::ClientConfig>,
  pub alpn_protocols: AlpnProtocols,
  local_certificate: Vec<CertificateDer<'static>>,
}

impl ClientSslConfig {
  pub fn builder() -> ClientSslConfigBuilder {
    ClientSslConfigBuilder::default()
  }

  pub fn rustls_config(&self) -> Arc<rustls::ClientConfig> {
    self.inner.clone()
  }

  /// The client certificate chain supplied for mutual TLS, if any. Backs
  /// `getCertificate()`/`getX509Certificate()` (spec.md §6) — rustls does
  /// not surface "my own certificate" from a live connection the way it
  /// surfaces the peer's, so this is captured at config build time instead.
  pub fn local_certificate(&self) -> &[CertificateDer<'static>] {
    &self.local_certificate
  }
}

#[derive(Default)]
pub struct ClientSslConfigBuilder {
  extra_roots: Vec<CertificateDer<'static>>,
  client_cert: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
  alpn_protocols: AlpnProtocols,
  reject_unauthorized: bool,
  set_reject: bool,
}

impl ClientSslConfigBuilder {
  pub fn with_ca_certs(mut self, certs: Vec<CertificateDer<'static>>) -> Self {
    self.extra_roots = certs;
    self
  }

  pub fn with_client_cert(mut self, certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
    self.client_cert = Some((certs, key));
    self
  }

  pub fn with_alpn_protocols(mut self, protos: AlpnProtocols) -> Self {
    self.alpn_protocols = protos;
    self
  }

  /// Corresponds to `setVerifyMode(request_cert, reject_unauthorized)`'s
  /// second argument; the source reads `request_cert_js` for both, which
  /// the spec flags as a bug. This builder takes the two independently.
  pub fn reject_unauthorized(mut self, reject: bool) -> Self {
    self.reject_unauthorized = reject;
    self.set_reject = true;
    self
  }

  pub fn build(self) -> Result<ClientSslConfig, TlsError> {
    let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for cert in self.extra_roots {
      // A malformed extra root is a configuration mistake, not a handshake
      // failure; surface it the same way a bad PEM file would be.
      roots
        .add(cert)
        .map_err(|e| TlsError::InvalidPem { reason: e.to_string() })?;
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

    let local_certificate = self.client_cert.as_ref().map(|(certs, _)| certs.clone()).unwrap_or_default();

    let mut config = if let Some((certs, key)) = self.client_cert {
      builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| TlsError::Config(Box::new(e)))?
    } else {
      builder.with_no_client_auth()
    };

    if self.set_reject && !self.reject_unauthorized {
      config.dangerous().set_certificate_verifier(Arc::new(AcceptAnyServerCert));
    }

    config.alpn_protocols = self.alpn_protocols.as_rustls();

    Ok(ClientSslConfig {
      inner: Arc::new(config),
      alpn_protocols: self.alpn_protocols,
      local_certificate,
    })
  }
}

/// Server-side TLS configuration: certificate chain + key, ALPN protocol
/// list (selected via [`crate::alpn::AlpnProtocols::select`]), session
/// resumption cache, SNI-keyed alternates (see `ListenContext::addServerName`
/// in `sock_net`, which holds one `ServerSslConfig` per hostname).
#[derive(Clone)]
pub struct ServerSslConfig {
  inner: Arc<rustls::ServerConfig>,
  pub alpn_protocols: AlpnProtocols,
  local_certificate: Vec<CertificateDer<'static>>,
  certified_key: Arc<CertifiedKey>,
}

impl ServerSslConfig {
  pub fn builder() -> ServerSslConfigBuilder {
    ServerSslConfigBuilder::default()
  }

  pub fn rustls_config(&self) -> Arc<rustls::ServerConfig> {
    self.inner.clone()
  }

  /// Backs `getCertificate()`/`getX509Certificate()`: the chain this
  /// listener presents, captured at config build time (see the matching
  /// note on `ClientSslConfig::local_certificate`).
  pub fn local_certificate(&self) -> &[CertificateDer<'static>] {
    &self.local_certificate
  }

  /// The cert chain + signing key pair, pre-resolved from PEM at build
  /// time. Only needed by [`server_config_with_sni`] to build a resolver
  /// spanning several `ServerSslConfig`s without re-parsing key material.
  fn certified_key(&self) -> Arc<CertifiedKey> {
    self.certified_key.clone()
  }
}

#[derive(Default)]
pub struct ServerSslConfigBuilder {
  certs: Vec<CertificateDer<'static>>,
  key: Option<PrivateKeyDer<'static>>,
  alpn_protocols: AlpnProtocols,
  request_cert: bool,
  session_cache_size: Option<usize>,
}

impl ServerSslConfigBuilder {
  pub fn with_cert_chain_and_key(mut self, certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
    self.certs = certs;
    self.key = Some(key);
    self
  }

  pub fn from_pem(mut self, cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| TlsError::InvalidPem { reason: e.to_string() })?;
    if certs.is_empty() {
      return Err(TlsError::InvalidPem { reason: "no certificates found".to_string() });
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
      .map_err(|e| TlsError::InvalidPem { reason: e.to_string() })?
      .ok_or(TlsError::MissingPrivateKey)?;
    self.certs = certs;
    self.key = Some(key);
    Ok(self)
  }

  pub fn with_alpn_protocols(mut self, protos: AlpnProtocols) -> Self {
    self.alpn_protocols = protos;
    self
  }

  pub fn request_client_cert(mut self, request: bool) -> Self {
    self.request_cert = request;
    self
  }

  pub fn with_session_cache_size(mut self, size: usize) -> Self {
    self.session_cache_size = Some(size);
    self
  }

  pub fn build(self) -> Result<ServerSslConfig, TlsError> {
    let certs = self.certs;
    let key = self.key.ok_or(TlsError::MissingPrivateKey)?;
    let local_certificate = certs.clone();

    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key).map_err(|e| TlsError::Config(Box::new(e)))?;
    let certified_key = Arc::new(CertifiedKey::new(certs.clone(), signing_key));

    // Client certificate requests are out of scope for the socket-level
    // verify toggle (spec.md §6's `setVerifyMode`) but the builder still
    // needs a branch, since `with_no_client_auth` and a verifying builder
    // are distinct rustls types.
    let mut config = rustls::ServerConfig::builder()
      .with_no_client_auth()
      .with_single_cert(certs, key)
      .map_err(|e| TlsError::Config(Box::new(e)))?;

    config.send_tls13_tickets = 2;
    config.session_storage = ServerSessionMemoryCache::new(self.session_cache_size.unwrap_or(DEFAULT_SESSION_CACHE_SIZE));
    config.alpn_protocols = self.alpn_protocols.as_rustls();

    Ok(ServerSslConfig {
      inner: Arc::new(config),
      alpn_protocols: self.alpn_protocols,
      local_certificate,
      certified_key,
    })
  }
}

/// Resolves a certificate per-connection by the ClientHello's SNI hostname,
/// backing `ListenContext::addServerName` (spec.md §4.2/§6): a listener
/// bound with one default `ServerSslConfig` can register additional
/// hostname-keyed configs, and each inbound handshake presents whichever
/// certificate matches the name the client asked for.
struct SniCertResolver {
  default: Arc<CertifiedKey>,
  by_name: HashMap<String, Arc<CertifiedKey>>,
}

impl ResolvesServerCert for SniCertResolver {
  fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
    if let Some(name) = client_hello.server_name() {
      if let Some(key) = self.by_name.get(name) {
        return Some(key.clone());
      }
    }
    Some(self.default.clone())
  }
}

/// Builds a `ServerSslConfig` that routes each handshake's SNI hostname
/// through `by_name`, falling back to `default` for unmatched or absent
/// SNI. The other negotiated behavior (ALPN offer list, session
/// resumption cache) is carried over from `default` unchanged; only the
/// certificate selection varies per hostname.
pub fn server_config_with_sni(default: &ServerSslConfig, by_name: &HashMap<String, ServerSslConfig>) -> ServerSslConfig {
  let resolver = Arc::new(SniCertResolver {
    default: default.certified_key(),
    by_name: by_name.iter().map(|(host, cfg)| (host.clone(), cfg.certified_key())).collect(),
  });
  let base = default.rustls_config();
  let mut config = rustls::ServerConfig::builder().with_no_client_auth().with_cert_resolver(resolver);
  config.send_tls13_tickets = base.send_tls13_tickets;
  config.session_storage = base.session_storage.clone();
  config.alpn_protocols = base.alpn_protocols.clone();

  ServerSslConfig {
    inner: Arc::new(config),
    alpn_protocols: default.alpn_protocols.clone(),
    local_certificate: default.local_certificate().to_vec(),
    certified_key: default.certified_key(),
  }
}

pub fn parse_server_name(host: &str) -> Result<ServerName<'static>, TlsError> {
  ServerName::try_from(host.to_string()).map_err(|_| TlsError::InvalidPem {
    reason: format!("invalid server name: {host}"),
  })
}

/// `reject_unauthorized: false` escape hatch. Only reachable when the
/// caller explicitly disabled verification via `setVerifyMode`/`rejectUnauthorized`.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
  fn verify_server_cert(
    &self,
    _end_entity: &CertificateDer<'_>,
    _intermediates: &[CertificateDer<'_>],
    _server_name: &ServerName<'_>,
    _ocsp_response: &[u8],
    _now: rustls::pki_types::UnixTime,
  ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
    Ok(rustls::client::danger::ServerCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer<'_>,
    _dss: &rustls::DigitallySignedStruct,
  ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
    Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
  }

  fn verify_tls13_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer<'_>,
    _dss: &rustls::DigitallySignedStruct,
  ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
    Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
  }

  fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
    vec![
      rustls::SignatureScheme::RSA_PKCS1_SHA256,
      rustls::SignatureScheme::RSA_PKCS1_SHA384,
      rustls::SignatureScheme::RSA_PKCS1_SHA512,
      rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
      rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
      rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
      rustls::SignatureScheme::RSA_PSS_SHA256,
      rustls::SignatureScheme::RSA_PSS_SHA384,
      rustls::SignatureScheme::RSA_PSS_SHA512,
      rustls::SignatureScheme::ED25519,
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn client_config_defaults_to_verifying() {
    let cfg = ClientSslConfig::builder().build().unwrap();
    // Can't introspect rustls internals directly; just assert construction
    // succeeds and alpn defaults to empty.
    assert!(cfg.alpn_protocols.is_empty());
  }

  #[test]
  fn server_config_requires_key_material() {
    let err = ServerSslConfig::builder().build().unwrap_err();
    assert!(matches!(err, TlsError::MissingPrivateKey));
  }

  const TEST_CERT_PEM: &str = include_str!("../net/tests/fixtures/test_cert.pem");
  const TEST_KEY_PEM: &str = include_str!("../net/tests/fixtures/test_key.pem");

  // `ClientHello` has no public constructor outside a live handshake, so
  // actually exercising the resolver's hostname lookup is covered by
  // `sock_net`'s loopback integration test instead; this only checks that
  // combining several `ServerSslConfig`s carries the expected ALPN/cert
  // metadata over without panicking.
  #[test]
  fn sni_combined_config_carries_over_default_metadata() {
    let default = ServerSslConfig::builder().from_pem(TEST_CERT_PEM.as_bytes(), TEST_KEY_PEM.as_bytes()).unwrap().build().unwrap();
    let alt = ServerSslConfig::builder().from_pem(TEST_CERT_PEM.as_bytes(), TEST_KEY_PEM.as_bytes()).unwrap().build().unwrap();
    let mut by_name = HashMap::new();
    by_name.insert("example.com".to_string(), alt);

    let combined = server_config_with_sni(&default, &by_name);
    assert_eq!(combined.local_certificate(), default.local_certificate());
    assert_eq!(combined.alpn_protocols, default.alpn_protocols);
  }
}
