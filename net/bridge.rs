// Copyright 2018-2026 the Deno authors. MIT license.
//
// DuplexBridge (spec.md §4.6): adapts an external, user-provided duplex
// stream into the TLSLayer surface. Unlike `wrap::upgrade_tls` (which
// splices TLS atop a transport this crate already owns), here the
// transport is a caller-supplied `AsyncRead + AsyncWrite` that this crate
// never dialed or accepted itself — a host binding hands it in after
// adapting its own duplex object (read/write/end/on-data events, the
// out-of-scope scripting-runtime surface per spec.md §1) into this shape.

use std::rc::Rc;
use std::time::Duration;

use sock_tls::ClientSslConfig;
use sock_tls::HandshakeOutcome;
use sock_tls::ServerSslConfig;
use sock_tls::TlsLayer;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

use crate::duplex::DuplexIo;
use crate::engine::ConnectionEngine;
use crate::error::NetError;
use crate::handler::HandlerSet;
use crate::transport::RawTransport;

/// Which side of the handshake `upgradeDuplex` performs over the bridged
/// stream, mirroring `wrap::UpgradeRole`.
pub enum DuplexTlsRole {
  Server(ServerSslConfig),
  Client { config: ClientSslConfig, server_name: String },
}

/// `upgradeDuplex(duplex, opts)` (spec.md §4.6/§6): wraps an arbitrary
/// caller-supplied stream as a transport and drives a TLS handshake over
/// it exactly as `ConnectionEngine::connect_tls`/`accept_tls` would over a
/// real socket, producing the `tlsView` engine spec.md §6 describes.
///
/// "Schedule `startTLS` for the next tick" (spec.md §4.6) is modeled by
/// yielding to the executor once before driving the handshake: whatever
/// else a host binding queued while constructing the bridge (in
/// particular, wiring up the duplex object's own event plumbing) gets a
/// chance to run first, rather than the handshake racing the
/// constructor's caller synchronously within the same turn.
pub async fn upgrade_duplex<S>(stream: S, role: DuplexTlsRole, handlers: Rc<HandlerSet>, idle_timeout: Duration) -> Result<(ConnectionEngine, HandshakeOutcome), NetError>
where
  S: AsyncRead + AsyncWrite + 'static,
{
  tokio::task::yield_now().await;

  let transport = RawTransport::Duplex(DuplexIo::new(stream));
  let engine = ConnectionEngine::new(handlers, None, idle_timeout, false);
  let (layer, outcome) = match &role {
    DuplexTlsRole::Server(config) => TlsLayer::accept(transport, config).await?,
    DuplexTlsRole::Client { config, server_name } => TlsLayer::connect(transport, config, server_name).await?,
  };
  engine.install_tls(layer);

  // Open/handshake ordering follows spec.md §4.4 exactly as it would for
  // a TLS-native socket: the handshake has already completed by the time
  // any callback can fire here, so `open` always fires, and `handshake`
  // fires alongside it only when the caller registered one.
  let has_handshake_cb = engine.handlers_rc().map(|h| h.handshake.borrow().is_some()).unwrap_or(false);
  engine.fire_open();
  if has_handshake_cb {
    engine.fire_handshake(&outcome);
  }
  if matches!(role, DuplexTlsRole::Client { .. }) {
    engine.disarm_open_after_handshake();
  }

  Ok((engine, outcome))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::EngineControl;
  use crate::handler::DataEvent;
  use crate::handler::HandlerSetBuilder;
  use crate::payload::WritePayload;
  use sock_tls::ServerSslConfig;
  use std::cell::RefCell;

  const TEST_CERT_PEM: &str = include_str!("tests/fixtures/test_cert.pem");
  const TEST_KEY_PEM: &str = include_str!("tests/fixtures/test_key.pem");

  #[tokio::test]
  async fn bridges_a_duplex_stream_through_a_tls_handshake() {
    tokio::task::LocalSet::new()
      .run_until(async {
        let (client_io, server_io) = tokio::io::duplex(8192);

        let server_ssl = ServerSslConfig::builder().from_pem(TEST_CERT_PEM.as_bytes(), TEST_KEY_PEM.as_bytes()).unwrap().build().unwrap();
        let mut server_handlers = HandlerSetBuilder::default();
        let received = Rc::new(RefCell::new(Vec::<u8>::new()));
        let received_clone = received.clone();
        server_handlers.data = Some(Box::new(move |_, ev: DataEvent| {
          received_clone.borrow_mut().extend_from_slice(&ev.bytes);
        }));
        let server_task = tokio::task::spawn_local(upgrade_duplex(
          server_io,
          DuplexTlsRole::Server(server_ssl),
          Rc::new(server_handlers.build().unwrap()),
          Duration::from_secs(120),
        ));

        let client_ssl = ClientSslConfig::builder().reject_unauthorized(false).build().unwrap();
        let mut client_handlers = HandlerSetBuilder::default();
        client_handlers.data = Some(Box::new(|_, _| {}));
        let (client, _outcome) = upgrade_duplex(
          client_io,
          DuplexTlsRole::Client { config: client_ssl, server_name: "localhost".to_string() },
          Rc::new(client_handlers.build().unwrap()),
          Duration::from_secs(120),
        )
        .await
        .unwrap();

        let (server, _) = server_task.await.unwrap().unwrap();
        std::mem::forget(server);

        client.handle().write(WritePayload::new(b"bridged".to_vec())).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(&*received.borrow(), b"bridged");
      })
      .await;
  }
}
