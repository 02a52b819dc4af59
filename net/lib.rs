// Copyright 2018-2026 the Deno authors. MIT license.

//! Scriptable TCP/TLS socket core: the Endpoint/HandlerSet/ListenContext/
//! ConnectionEngine/WrapAdapter/DuplexBridge model a host scripting runtime
//! embeds to expose a `net`-style socket API to scripts.
//!
//! This crate assumes a single-threaded, cooperative host event loop (no
//! connection's state is ever touched from more than one OS thread at a
//! time), which is why every shared type here leans on `Rc`/`Cell`/`RefCell`
//! rather than `Arc`/`Mutex`. Driving the actual event loop — the thing that
//! polls the futures this crate spawns via `tokio::task::spawn_local` — is
//! the embedding host's job; see `tests/loopback.rs` for the minimal
//! `LocalSet` shape that exercises it.

mod backlog;
mod bridge;
mod config;
mod duplex;
mod endpoint;
mod engine;
mod error;
mod handler;
mod listen;
mod payload;
#[cfg(windows)]
mod pipe;
mod transport;
mod wrap;

pub use bridge::upgrade_duplex;
pub use bridge::DuplexTlsRole;
pub use config::apply_socket_options;
pub use config::SocketConfig;
pub use config::SocketConfigBuilder;
pub use duplex::DuplexIo;
pub use endpoint::Endpoint;
pub use endpoint::RawHandle;
pub use engine::ConnectionEngine;
pub use engine::EngineControl;
pub use engine::EngineFlags;
pub use engine::EngineState;
pub use error::NetError;
pub use handler::ActiveScope;
pub use handler::Callback;
pub use handler::CloseCallback;
pub use handler::ConnectErrorCallback;
pub use handler::ConnectionHandle;
pub use handler::DataCallback;
pub use handler::DataEvent;
pub use handler::DrainCallback;
pub use handler::EndCallback;
pub use handler::ErrorCallback;
pub use handler::HandlerSet;
pub use handler::HandlerSetBuilder;
pub use handler::HandshakeCallback;
pub use handler::HandshakeEvent;
pub use handler::OpenCallback;
pub use handler::TimeoutCallback;
pub use listen::ListenContext;
pub use payload::BinaryType;
pub use payload::Encoding;
pub use payload::WritePayload;
pub use sock_tls::AlpnProtocols;
pub use sock_tls::CipherInfo;
pub use sock_tls::ClientSslConfig;
pub use sock_tls::EphemeralKeyInfo;
pub use sock_tls::PeerCertificate;
pub use sock_tls::Role;
pub use sock_tls::ServerSslConfig;
pub use sock_tls::SessionTicket;
pub use sock_tls::SigAlg;
pub use sock_tls::SslConfig;
pub use sock_tls::TlsError;
#[cfg(windows)]
pub use pipe::PipeListener;
#[cfg(windows)]
pub use pipe::PipeStream;
pub use transport::RawTransport;
pub use wrap::upgrade_tls;
pub use wrap::UpgradeRole;
