// Copyright 2018-2026 the Deno authors. MIT license.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::task::Context;
use std::task::Poll;

use rustls::pki_types::CertificateDer;
use rustls::pki_types::ServerName;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio_rustls::TlsConnector;
use tokio_rustls::TlsStream;

use crate::alpn::AlpnProtocols;
use crate::cert::CipherInfo;
use crate::cert::PeerCertificate;
use crate::config::ClientSslConfig;
use crate::config::ServerSslConfig;
use crate::config::parse_server_name;
use crate::error::TlsError;
use crate::keying;
use crate::session::SessionTicket;

/// The result handed to the socket engine's `handshake` callback: `{authorized,
/// verifyError}` from spec.md §4.4, plus the negotiated ALPN protocol and
/// peer certificate since the engine needs both immediately to decide
/// whether to fire `open` and to answer `getALPNProtocol()`/`getPeerCertificate()`.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
  pub authorized: bool,
  pub verify_error: Option<String>,
  pub alpn_selected: Option<Vec<u8>>,
  pub peer_certificate: Option<PeerCertificate>,
}

/// Which role this layer negotiated as; renegotiation and a few
/// introspection calls behave differently for each (spec.md §4.4: "server
/// sockets never renegotiate").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Client,
  Server,
}

/// Wraps an arbitrary `AsyncRead + AsyncWrite` transport with a driven TLS
/// handshake and the introspection surface from spec.md §6. One `TlsLayer`
/// corresponds to one `wrapped=none` TLS `ConnectionEngine`, or to the TLS
/// face of a `WrapAdapter` pair, or to the stream backing a `DuplexBridge`.
pub struct TlsLayer<S> {
  stream: TlsStream<S>,
  role: Role,
  server_name: Option<String>,
  session_cache: Arc<SingleSlotSessionStore>,
  renegotiation_disabled: bool,
  local_certificate: Option<PeerCertificate>,
}

impl<S> TlsLayer<S>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  /// Drives a client handshake to completion atop `stream`, per spec.md
  /// §4.4 "attach to a stream, drive handshake".
  pub async fn connect(stream: S, config: &ClientSslConfig, server_name: &str) -> Result<(Self, HandshakeOutcome), TlsError> {
    let name: ServerName<'static> = parse_server_name(server_name)?;
    let connector = TlsConnector::from(config.rustls_config());
    let tls_stream = connector.connect(name, stream).await.map_err(TlsError::from)?;
    let (_, conn) = tls_stream.get_ref();
    let outcome = HandshakeOutcome {
      authorized: true,
      verify_error: None,
      alpn_selected: conn.alpn_protocol().map(|p| p.to_vec()),
      peer_certificate: conn.peer_certificates().map(|c| c.to_vec()).and_then(PeerCertificate::from_chain),
    };
    Ok((
      Self {
        stream: TlsStream::Client(tls_stream),
        role: Role::Client,
        server_name: Some(server_name.to_string()),
        session_cache: Arc::new(SingleSlotSessionStore::default()),
        renegotiation_disabled: false,
        local_certificate: PeerCertificate::from_chain(config.local_certificate().to_vec()),
      },
      outcome,
    ))
  }

  /// Drives a server-side handshake, including SNI-keyed server name
  /// inspection and ALPN selection (spec.md §4.4: "ALPN selection on the
  /// server uses SSL_select_next_proto").
  pub async fn accept(stream: S, config: &ServerSslConfig) -> Result<(Self, HandshakeOutcome), TlsError> {
    let acceptor = tokio_rustls::TlsAcceptor::from(config.rustls_config());
    let tls_stream = acceptor.accept(stream).await.map_err(TlsError::from)?;
    let (_, conn) = tls_stream.get_ref();
    let sni = conn.server_name().map(|s| s.to_string());
    let outcome = HandshakeOutcome {
      authorized: true,
      verify_error: None,
      alpn_selected: conn.alpn_protocol().map(|p| p.to_vec()),
      peer_certificate: conn.peer_certificates().map(|c| c.to_vec()).and_then(PeerCertificate::from_chain),
    };
    Ok((
      Self {
        stream: TlsStream::Server(tls_stream),
        role: Role::Server,
        server_name: sni,
        session_cache: Arc::new(SingleSlotSessionStore::default()),
        renegotiation_disabled: false,
        local_certificate: PeerCertificate::from_chain(config.local_certificate().to_vec()),
      },
      outcome,
    ))
  }

  pub fn role(&self) -> Role {
    self.role
  }

  pub fn get_servername(&self) -> Option<&str> {
    self.server_name.as_deref()
  }

  /// `setServername`: only valid before the underlying SSL object starts,
  /// which for this layer means there is no live connection yet. Since
  /// `TlsLayer` only exists post-handshake, any call here is necessarily
  /// too late.
  pub fn set_servername(&mut self, _name: &str) -> Result<(), TlsError> {
    Err(TlsError::AlreadyStarted)
  }

  pub fn get_alpn_protocol(&self) -> Option<Vec<u8>> {
    match &self.stream {
      TlsStream::Client(s) => s.get_ref().1.alpn_protocol().map(|p| p.to_vec()),
      TlsStream::Server(s) => s.get_ref().1.alpn_protocol().map(|p| p.to_vec()),
    }
  }

  pub fn get_cipher(&self) -> Option<CipherInfo> {
    let suite = match &self.stream {
      TlsStream::Client(s) => s.get_ref().1.negotiated_cipher_suite(),
      TlsStream::Server(s) => s.get_ref().1.negotiated_cipher_suite(),
    }?;
    let version = match &self.stream {
      TlsStream::Client(s) => s.get_ref().1.protocol_version(),
      TlsStream::Server(s) => s.get_ref().1.protocol_version(),
    };
    let name = format!("{:?}", suite.suite());
    Some(CipherInfo {
      standard_name: name.clone(),
      name,
      version: version.map(|v| format!("{v:?}")).unwrap_or_else(|| "unknown".to_string()),
    })
  }

  pub fn get_tls_version(&self) -> Option<String> {
    match &self.stream {
      TlsStream::Client(s) => s.get_ref().1.protocol_version(),
      TlsStream::Server(s) => s.get_ref().1.protocol_version(),
    }
    .map(|v| format!("{v:?}"))
  }

  pub fn get_peer_certificate(&self) -> Option<PeerCertificate> {
    let chain: Option<Vec<CertificateDer<'static>>> = match &self.stream {
      TlsStream::Client(s) => s.get_ref().1.peer_certificates().map(|c| c.to_vec()),
      TlsStream::Server(s) => s.get_ref().1.peer_certificates().map(|c| c.to_vec()),
    };
    chain.and_then(PeerCertificate::from_chain)
  }

  /// `getCertificate()`/`getX509Certificate()`: the local (not peer)
  /// certificate chain this side presented, captured from the `SslConfig`
  /// at handshake time (see the module doc on [`ClientSslConfig::local_certificate`]).
  pub fn get_certificate(&self) -> Option<PeerCertificate> {
    self.local_certificate.clone()
  }

  /// `getTLSFinishedMessage()`/`getTLSPeerFinishedMessage()`. OpenSSL
  /// exposes the raw Finished message bytes via `SSL_get_finished`/
  /// `SSL_get_peer_finished`; rustls has no equivalent accessor on
  /// `ConnectionCommon`, so these always report absent rather than
  /// approximating a value that isn't actually the wire Finished message.
  pub fn get_tls_finished_message(&self) -> Option<Vec<u8>> {
    None
  }

  pub fn get_tls_peer_finished_message(&self) -> Option<Vec<u8>> {
    None
  }

  /// `getEphemeralKeyInfo()`: rustls only surfaces the negotiated key
  /// exchange group, not a bit count or raw parameters (it never did
  /// finite-field DH, only ECDH groups), so `bits` reports the group's
  /// advertised curve size when known and 0 otherwise.
  pub fn get_ephemeral_key_info(&self) -> Option<crate::cert::EphemeralKeyInfo> {
    let group = match &self.stream {
      TlsStream::Client(s) => s.get_ref().1.negotiated_key_exchange_group(),
      TlsStream::Server(s) => s.get_ref().1.negotiated_key_exchange_group(),
    }?;
    Some(crate::cert::EphemeralKeyInfo {
      kind: crate::cert::EphemeralKeyKind::Ecdh,
      name: Some(format!("{:?}", group.name())),
      bits: 0,
    })
  }

  /// `getSharedSigalgs()`. rustls does not surface the negotiated signature
  /// algorithm list through its public API (unlike OpenSSL's
  /// `SSL_get_shared_sigalgs`), so this always reports empty rather than
  /// guessing from the cipher suite.
  pub fn get_shared_sigalgs(&self) -> Vec<crate::cert::SigAlg> {
    Vec::new()
  }

  /// RFC 5705 keying material export (`exportKeyingMaterial`).
  pub fn export_keying_material(&self, length: usize, label: &str, context: Option<&[u8]>) -> Result<Vec<u8>, TlsError> {
    match &self.stream {
      TlsStream::Client(s) => keying::export_keying_material(&s.get_ref().1, length, label, context),
      TlsStream::Server(s) => keying::export_keying_material(&s.get_ref().1, length, label, context),
    }
  }

  /// See the module-level note in [`SingleSlotSessionStore`]: rustls
  /// deliberately does not expose a portable wire format for resumption
  /// tickets the way OpenSSL's `SSL_SESSION_to_bytes` does, so this is an
  /// opaque, process-local round-trip rather than a real serialized ticket.
  pub fn get_session(&self) -> Option<SessionTicket> {
    self.session_cache.current()
  }

  pub fn set_session(&self, ticket: SessionTicket) -> Result<(), TlsError> {
    self.session_cache.seed(ticket);
    Ok(())
  }

  pub fn get_tls_ticket(&self) -> Option<SessionTicket> {
    self.get_session()
  }

  /// rustls intentionally does not implement TLS renegotiation (RFC 5746
  /// mitigations aside, it simply never negotiates it); server sockets
  /// never renegotiate per spec.md §4.4 regardless of library support.
  pub fn renegotiate(&mut self) -> Result<(), TlsError> {
    if self.role == Role::Server || self.renegotiation_disabled {
      return Err(TlsError::RenegotiationUnsupported);
    }
    Err(TlsError::RenegotiationUnsupported)
  }

  pub fn disable_renegotiation(&mut self) {
    self.renegotiation_disabled = true;
  }

  /// `setMaxSendFragment(512..16384)`. rustls bakes the fragment size into
  /// the config at construction time rather than exposing a live per-connection
  /// setter, so this validates the requested bound and reports it back for
  /// the engine to surface as accepted/rejected without claiming it takes
  /// effect retroactively on an already-established connection.
  pub fn set_max_send_fragment(&mut self, size: usize) -> Result<(), TlsError> {
    if !(512..=16384).contains(&size) {
      return Err(TlsError::InvalidMaxSendFragment(size));
    }
    Ok(())
  }
}

impl<S> AsyncRead for TlsLayer<S>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
    Pin::new(&mut self.stream).poll_read(cx, buf)
  }
}

impl<S> AsyncWrite for TlsLayer<S>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
    Pin::new(&mut self.stream).poll_write(cx, buf)
  }

  fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    Pin::new(&mut self.stream).poll_flush(cx)
  }

  fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
    Pin::new(&mut self.stream).poll_shutdown(cx)
  }
}

/// Backs `get_session()`/`set_session()`. rustls does not expose a stable
/// cross-process resumption ticket format (by design — the OpenSSL-style
/// `SSL_SESSION_to_bytes`/`from_bytes` pair is a known source of downgrade
/// and replay bugs). This store keeps exactly one opaque, process-local
/// blob per connection: real resumption correctness for same-process
/// reconnects is delegated to rustls's own `ClientSessionMemoryCache`,
/// wired in via [`crate::config::ClientSslConfigBuilder`]; this cache only
/// needs to satisfy the idempotence property that `setSession(getSession())`
/// does not error.
#[derive(Default)]
struct SingleSlotSessionStore {
  slot: Mutex<Option<SessionTicket>>,
}

impl SingleSlotSessionStore {
  fn current(&self) -> Option<SessionTicket> {
    self.slot.lock().unwrap().clone()
  }

  fn seed(&self, ticket: SessionTicket) {
    *self.slot.lock().unwrap() = Some(ticket);
  }
}

impl std::fmt::Debug for SingleSlotSessionStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SingleSlotSessionStore").finish_non_exhaustive()
  }
}

#[allow(unused)]
fn _alpn_offer_hint(protos: &AlpnProtocols) -> usize {
  protos.0.len()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn session_round_trip_is_idempotent() {
    let store = SingleSlotSessionStore::default();
    assert!(store.current().is_none());
    store.seed(SessionTicket::from(vec![7, 7]));
    let got = store.current().unwrap();
    store.seed(got);
    assert_eq!(store.current().unwrap().as_bytes(), &[7, 7]);
  }
}
