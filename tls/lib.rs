// Copyright 2018-2026 the Deno authors. MIT license.

//! TLS primitive surface consumed by the socket engine (`sock_net`).
//!
//! This crate owns everything the spec calls "the TLS library's defined
//! callback surface": context construction from PEM material, handshake
//! driving atop an arbitrary `AsyncRead + AsyncWrite`, and the
//! introspection surface (ALPN, SNI, peer certificate, session,
//! keying material). X.509 field parsing and DNS/address resolution are
//! out of scope here, same as for the core.

mod alpn;
mod cert;
mod config;
mod error;
mod keying;
mod layer;
mod session;

pub use alpn::AlpnProtocols;
pub use alpn::NoApplicationProtocol;
pub use cert::CipherInfo;
pub use cert::EphemeralKeyInfo;
pub use cert::PeerCertificate;
pub use cert::SigAlg;
pub use config::ClientSslConfig;
pub use config::ServerSslConfig;
pub use config::SslConfig;
pub use config::server_config_with_sni;
pub use error::TlsError;
pub use keying::export_keying_material;
pub use layer::HandshakeOutcome;
pub use layer::Role;
pub use layer::TlsLayer;
pub use session::SessionTicket;
