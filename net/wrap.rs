// Copyright 2018-2026 the Deno authors. MIT license.
//
// In-place TCP→TLS upgrade (spec.md §4.5). `upgradeTLS` takes an Open,
// non-TLS `ConnectionEngine` and returns a pair of views over the same
// transport: a raw TCP face and a TLS face.

use std::rc::Rc;

use sock_tls::ClientSslConfig;
use sock_tls::HandshakeOutcome;
use sock_tls::ServerSslConfig;
use sock_tls::TlsLayer;

use crate::engine::ConnectionEngine;
use crate::engine::EngineState;
use crate::error::NetError;
use crate::handler::HandlerSetBuilder;

/// Which side of the handshake `upgradeTLS` performs — a listener upgrading
/// an accepted connection acts as the TLS server; an outbound socket
/// performing STARTTLS acts as the TLS client.
pub enum UpgradeRole {
  Server(ServerSslConfig),
  Client { config: ClientSslConfig, server_name: String },
}

/// `upgradeTLS(socket, {socket: handlers, tls: sslConfig})` (spec.md §4.5).
///
/// This crate's transport ownership model (`RawTransport` is moved, not
/// shared, into whichever `TlsLayer` drives it) means the "two engines
/// sharing one transport handle" of spec.md I6 is realized as: the TLS
/// face is the only engine that ever reads or writes the transport again;
/// the raw face becomes an inert shell that keeps the originating
/// `HandlerSet` reference rooted (so in-flight callback state referencing
/// it stays valid) but never receives another event, matching scenario 5
/// of spec.md §8 ("the raw view receives no further bytes").
pub async fn upgrade_tls(origin: &ConnectionEngine, raw_handlers: Rc<crate::handler::HandlerSet>, tls_handlers: HandlerSetBuilder, role: UpgradeRole) -> Result<(ConnectionEngine, ConnectionEngine), NetError> {
  if origin.state() != EngineState::Open {
    return Err(NetError::invalid_state("upgradeTLS requires an Open, non-TLS engine"));
  }
  if origin.is_tls() {
    return Err(NetError::invalid_state("engine is already TLS"));
  }

  let idle_timeout = origin.idle_timeout();
  let raw_transport = origin.take_raw_transport()?;

  let allow_half_open = origin.allow_half_open();
  let tls_handlers = Rc::new(tls_handlers.build()?);
  let tls_engine = ConnectionEngine::new(tls_handlers, None, idle_timeout, allow_half_open);

  let handshake: Result<(TlsLayer<crate::transport::RawTransport>, HandshakeOutcome), NetError> = match &role {
    UpgradeRole::Server(config) => TlsLayer::accept(raw_transport, config).await.map_err(NetError::from),
    UpgradeRole::Client { config, server_name } => TlsLayer::connect(raw_transport, config, server_name).await.map_err(NetError::from),
  };

  let (layer, outcome) = match handshake {
    Ok(pair) => pair,
    Err(e) => {
      // spec.md §4.5 step 3 calls for resetting to pure TCP on wrap
      // failure. `tokio_rustls`'s `connect`/`accept` consumes the stream
      // and drops it on error, so there is no transport left to reset —
      // both views are torn down instead. See DESIGN.md.
      origin.detach_after_wrap();
      tls_engine.close_without_transport();
      return Err(e);
    }
  };

  tls_engine.install_tls(layer);

  let raw_view = ConnectionEngine::new_detached_view(raw_handlers, idle_timeout);

  origin.detach_after_wrap();

  // open/handshake ordering for the TLS face follows spec.md §4.4 exactly
  // as it would for a socket that was TLS-native from connect time.
  let has_handshake_cb = tls_engine.handlers_rc().map(|h| h.handshake.borrow().is_some()).unwrap_or(false);
  if has_handshake_cb {
    tls_engine.fire_open();
    tls_engine.fire_handshake(&outcome);
  } else {
    tls_engine.fire_open();
  }
  if matches!(role, UpgradeRole::Client { .. }) {
    tls_engine.disarm_open_after_handshake();
  }

  Ok((raw_view, tls_engine))
}
