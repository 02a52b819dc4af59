// Copyright 2018-2026 the Deno authors. MIT license.

/// Errors surfaced from the TLS library's error queue, or from the
/// construction/introspection helpers layered on top of it.
///
/// Variants carry structured context rather than a pre-formatted string so
/// callers (principally `sock_net::NetError`) can inspect and re-translate
/// them without string matching.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
  /// The PEM material supplied for a certificate/key did not parse.
  #[error("invalid PEM material: {reason}")]
  InvalidPem { reason: String },

  /// No private key was found in the supplied key material.
  #[error("no private key found in supplied key material")]
  MissingPrivateKey,

  /// `rustls::ServerConfig`/`ClientConfig` construction failed.
  #[error("TLS configuration error: {0}")]
  Config(#[source] Box<rustls::Error>),

  /// The handshake or a subsequent read/write failed at the protocol level.
  #[error("TLS protocol error: {0}")]
  Protocol(#[source] Box<rustls::Error>),

  /// `setServername` called after the underlying SSL object was already
  /// initialized.
  #[error("Already started.")]
  AlreadyStarted,

  /// ALPN server-side selection found no overlap between offered and
  /// configured protocols; a fatal `no_application_protocol` alert
  /// (RFC 7301 §3.2) must be sent rather than silently proceeding.
  #[error("no_application_protocol")]
  NoApplicationProtocol,

  /// `setMaxSendFragment` called with a value outside `512..=16384`.
  #[error("invalid max send fragment size {0}, expected 512..=16384")]
  InvalidMaxSendFragment(usize),

  /// `exportKeyingMaterial` requested before the handshake completed.
  #[error("keying material cannot be exported before the handshake completes")]
  HandshakeNotComplete,

  /// `renegotiate()` invoked on a connection where it is unsupported
  /// (TLS 1.3 peer, server-side socket, or after `disableRenegotiation`).
  #[error("renegotiation is not supported on this connection")]
  RenegotiationUnsupported,

  /// Underlying I/O failure while driving the handshake or a record.
  #[error("TLS I/O error: {0}")]
  Io(#[source] std::io::Error),
}

impl TlsError {
  /// Reconstructs an equivalent `TlsError` for delivery to a second
  /// callback (`sock_net` fires both the `error` and `close` handlers from
  /// a single underlying failure). Not a `Clone` impl: `rustls::Error` is
  /// `Clone` and copies straight through, but `std::io::Error` is not, so
  /// the `Io` variant is rebuilt from its kind and message rather than
  /// duplicated bit-for-bit.
  pub fn duplicate(&self) -> TlsError {
    match self {
      TlsError::InvalidPem { reason } => TlsError::InvalidPem { reason: reason.clone() },
      TlsError::MissingPrivateKey => TlsError::MissingPrivateKey,
      TlsError::Config(e) => TlsError::Config(e.clone()),
      TlsError::Protocol(e) => TlsError::Protocol(e.clone()),
      TlsError::AlreadyStarted => TlsError::AlreadyStarted,
      TlsError::NoApplicationProtocol => TlsError::NoApplicationProtocol,
      TlsError::InvalidMaxSendFragment(n) => TlsError::InvalidMaxSendFragment(*n),
      TlsError::HandshakeNotComplete => TlsError::HandshakeNotComplete,
      TlsError::RenegotiationUnsupported => TlsError::RenegotiationUnsupported,
      TlsError::Io(e) => TlsError::Io(std::io::Error::new(e.kind(), e.to_string())),
    }
  }
}

impl From<rustls::Error> for TlsError {
  fn from(e: rustls::Error) -> Self {
    TlsError::Protocol(Box::new(e))
  }
}

impl From<std::io::Error> for TlsError {
  fn from(e: std::io::Error) -> Self {
    TlsError::Io(e)
  }
}
