// Copyright 2018-2026 the Deno authors. MIT license.
//
// Integration tests against real `tokio::net::TcpListener`/`TcpStream`
// loopback connections (SPEC_FULL.md §10.4), covering the scenarios
// spec.md §8 calls out: echo, backpressure, TLS handshake with and
// without a `handshake` callback, and STARTTLS-style upgrade.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use sock_net::BinaryType;
use sock_net::ConnectionEngine;
use sock_net::DataEvent;
use sock_net::EngineControl;
use sock_net::Endpoint;
use sock_net::HandlerSetBuilder;
use sock_net::ListenContext;
use sock_net::SocketConfig;
use sock_net::WritePayload;
use sock_tls::ClientSslConfig;
use sock_tls::ServerSslConfig;
use sock_tls::SslConfig;

const TEST_CERT_PEM: &str = include_str!("fixtures/test_cert.pem");
const TEST_KEY_PEM: &str = include_str!("fixtures/test_key.pem");

fn idle_timeout() -> Duration {
  Duration::from_secs(120)
}

#[tokio::test]
async fn loopback_echo_round_trips_bytes() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let received = Rc::new(RefCell::new(Vec::<u8>::new()));
      let received_on_server = received.clone();

      let mut server_handlers = HandlerSetBuilder::default();
      server_handlers.data = Some(Box::new(move |conn, ev: DataEvent| {
        conn.write(WritePayload::new(ev.bytes.to_vec())).unwrap();
      }));
      let config = SocketConfig::builder(Endpoint::TcpHost { host: "127.0.0.1".into(), port: 0 })
        .handlers(server_handlers)
        .idle_timeout(idle_timeout())
        .build()
        .unwrap();
      let listener = ListenContext::bind(config).await.unwrap();
      let addr = listener.local_addr().unwrap();

      let mut client_handlers = HandlerSetBuilder::default();
      client_handlers.data = Some(Box::new(move |_, ev: DataEvent| {
        received_on_server.borrow_mut().extend_from_slice(&ev.bytes);
      }));
      let client = ConnectionEngine::connect_tcp(&addr.ip().to_string(), addr.port(), Rc::new(client_handlers.build().unwrap()), idle_timeout(), false)
        .await
        .unwrap();

      client.handle().write(WritePayload::new(b"hello, loopback".to_vec())).unwrap();
      tokio::time::sleep(Duration::from_millis(100)).await;

      assert_eq!(&*received.borrow(), b"hello, loopback");
    })
    .await;
}

#[tokio::test]
async fn write_buffered_reports_backlog_state_and_eventually_drains() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let mut server_handlers = HandlerSetBuilder::default();
      server_handlers.data = Some(Box::new(|_, _| {}));
      let config = SocketConfig::builder(Endpoint::TcpHost { host: "127.0.0.1".into(), port: 0 })
        .handlers(server_handlers)
        .idle_timeout(idle_timeout())
        .build()
        .unwrap();
      let listener = ListenContext::bind(config).await.unwrap();
      let addr = listener.local_addr().unwrap();

      let drained = Rc::new(RefCell::new(false));
      let drained_in_cb = drained.clone();
      let mut client_handlers = HandlerSetBuilder::default();
      client_handlers.data = Some(Box::new(|_, _| {}));
      client_handlers.drain = Some(Box::new(move |_| {
        *drained_in_cb.borrow_mut() = true;
      }));
      let client = ConnectionEngine::connect_tcp(&addr.ip().to_string(), addr.port(), Rc::new(client_handlers.build().unwrap()), idle_timeout(), false)
        .await
        .unwrap();

      // A payload this size always fits in one non-blocking write over
      // loopback, so write_buffered should report the backlog already
      // drained rather than actually exercising the backlog path; this
      // still exercises the write_buffered/bytes_written accounting.
      let payload = vec![7u8; 4096];
      let fully_sent = client.handle().write_buffered(WritePayload::new(payload.clone())).unwrap();
      tokio::time::sleep(Duration::from_millis(50)).await;
      assert!(fully_sent || *drained.borrow());
      assert_eq!(client.handle().bytes_written(), payload.len() as u64);
    })
    .await;
}

#[tokio::test]
async fn tls_handshake_without_handshake_callback_still_fires_open() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let server_ssl = ServerSslConfig::builder().from_pem(TEST_CERT_PEM.as_bytes(), TEST_KEY_PEM.as_bytes()).unwrap().build().unwrap();
      let mut server_handlers = HandlerSetBuilder::default();
      server_handlers.data = Some(Box::new(|conn, ev: DataEvent| {
        conn.write(WritePayload::new(ev.bytes.to_vec())).unwrap();
      }));
      let config = SocketConfig::builder(Endpoint::TcpHost { host: "127.0.0.1".into(), port: 0 })
        .handlers(server_handlers)
        .ssl(SslConfig::Server(server_ssl))
        .idle_timeout(idle_timeout())
        .build()
        .unwrap();
      let listener = ListenContext::bind(config).await.unwrap();
      let addr = listener.local_addr().unwrap();

      let client_ssl = ClientSslConfig::builder().reject_unauthorized(false).build().unwrap();
      let mut client_handlers = HandlerSetBuilder::default();
      client_handlers.data = Some(Box::new(|_, _| {}));
      let opened = Rc::new(RefCell::new(false));
      let opened_in_cb = opened.clone();
      client_handlers.open = Some(Box::new(move |_| {
        *opened_in_cb.borrow_mut() = true;
      }));

      let (client, outcome) = ConnectionEngine::connect_tls("localhost", addr.port(), &client_ssl, Rc::new(client_handlers.build().unwrap()), idle_timeout(), false)
        .await
        .unwrap();
      assert!(outcome.authorized);
      assert!(client.is_tls());
      tokio::time::sleep(Duration::from_millis(50)).await;
      assert!(*opened.borrow());
    })
    .await;
}

#[tokio::test]
async fn tls_handshake_with_handshake_callback_receives_outcome() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let server_ssl = ServerSslConfig::builder().from_pem(TEST_CERT_PEM.as_bytes(), TEST_KEY_PEM.as_bytes()).unwrap().build().unwrap();
      let mut server_handlers = HandlerSetBuilder::default();
      server_handlers.data = Some(Box::new(|_, _| {}));
      let config = SocketConfig::builder(Endpoint::TcpHost { host: "127.0.0.1".into(), port: 0 })
        .handlers(server_handlers)
        .ssl(SslConfig::Server(server_ssl))
        .idle_timeout(idle_timeout())
        .build()
        .unwrap();
      let listener = ListenContext::bind(config).await.unwrap();
      let addr = listener.local_addr().unwrap();

      let client_ssl = ClientSslConfig::builder().reject_unauthorized(false).build().unwrap();
      let mut client_handlers = HandlerSetBuilder::default();
      client_handlers.data = Some(Box::new(|_, _| {}));
      let handshake_seen = Rc::new(RefCell::new(false));
      let handshake_seen_in_cb = handshake_seen.clone();
      client_handlers.handshake = Some(Box::new(move |_, ev| {
        assert!(ev.authorized);
        *handshake_seen_in_cb.borrow_mut() = true;
      }));

      let (_client, _outcome) = ConnectionEngine::connect_tls("localhost", addr.port(), &client_ssl, Rc::new(client_handlers.build().unwrap()), idle_timeout(), false)
        .await
        .unwrap();
      tokio::time::sleep(Duration::from_millis(50)).await;
      assert!(*handshake_seen.borrow());
    })
    .await;
}

#[tokio::test]
async fn tls_introspection_reports_cipher_and_peer_certificate() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let server_ssl = ServerSslConfig::builder().from_pem(TEST_CERT_PEM.as_bytes(), TEST_KEY_PEM.as_bytes()).unwrap().build().unwrap();
      let mut server_handlers = HandlerSetBuilder::default();
      server_handlers.data = Some(Box::new(|_, _| {}));
      let config = SocketConfig::builder(Endpoint::TcpHost { host: "127.0.0.1".into(), port: 0 })
        .handlers(server_handlers)
        .ssl(SslConfig::Server(server_ssl))
        .idle_timeout(idle_timeout())
        .build()
        .unwrap();
      let listener = ListenContext::bind(config).await.unwrap();
      let addr = listener.local_addr().unwrap();

      let client_ssl = ClientSslConfig::builder().reject_unauthorized(false).build().unwrap();
      let mut client_handlers = HandlerSetBuilder::default();
      client_handlers.data = Some(Box::new(|_, _| {}));
      let (client, _outcome) = ConnectionEngine::connect_tls("localhost", addr.port(), &client_ssl, Rc::new(client_handlers.build().unwrap()), idle_timeout(), false)
        .await
        .unwrap();

      assert!(client.get_cipher().is_some());
      assert!(client.get_tls_version().is_some());
      // The test fixture presents a certificate the client never uploaded
      // any trust material for, but `reject_unauthorized(false)` waives
      // verification — the chain itself is still captured.
      assert!(client.get_peer_certificate().is_some());
      // Client offered no cert of its own (no mutual TLS configured).
      assert!(client.get_certificate().is_none());
      assert!(client.get_alpn_protocol().is_none());
      assert!(client.set_servername("example.com").is_err());
      assert!(client.renegotiate().is_err());
    })
    .await;
}

#[tokio::test]
async fn tls_introspection_is_inert_on_plain_tcp_engine() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let mut server_handlers = HandlerSetBuilder::default();
      server_handlers.data = Some(Box::new(|_, _| {}));
      let config = SocketConfig::builder(Endpoint::TcpHost { host: "127.0.0.1".into(), port: 0 })
        .handlers(server_handlers)
        .idle_timeout(idle_timeout())
        .build()
        .unwrap();
      let listener = ListenContext::bind(config).await.unwrap();
      let addr = listener.local_addr().unwrap();

      let mut client_handlers = HandlerSetBuilder::default();
      client_handlers.data = Some(Box::new(|_, _| {}));
      let client = ConnectionEngine::connect_tcp(&addr.ip().to_string(), addr.port(), Rc::new(client_handlers.build().unwrap()), idle_timeout(), false)
        .await
        .unwrap();

      assert!(client.get_cipher().is_none());
      assert!(client.get_peer_certificate().is_none());
      assert!(client.get_session().is_none());
      assert!(client.export_keying_material(16, "label", None).is_err());
    })
    .await;
}

#[tokio::test]
async fn add_server_name_routes_matching_sni_through_the_registered_config() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let default_ssl = ServerSslConfig::builder().from_pem(TEST_CERT_PEM.as_bytes(), TEST_KEY_PEM.as_bytes()).unwrap().build().unwrap();
      let mut server_handlers = HandlerSetBuilder::default();
      server_handlers.data = Some(Box::new(|_, _| {}));
      let config = SocketConfig::builder(Endpoint::TcpHost { host: "127.0.0.1".into(), port: 0 })
        .handlers(server_handlers)
        .ssl(SslConfig::Server(default_ssl))
        .idle_timeout(idle_timeout())
        .build()
        .unwrap();
      let listener = ListenContext::bind(config).await.unwrap();
      let addr = listener.local_addr().unwrap();

      // Registers an alternate config for a hostname the client will
      // actually request via SNI; the fixture only has one cert/key pair
      // available, so this reuses it rather than proving a *different*
      // certificate came back, but it still exercises the resolver's
      // lookup-by-hostname path end to end.
      let alt_ssl = ServerSslConfig::builder().from_pem(TEST_CERT_PEM.as_bytes(), TEST_KEY_PEM.as_bytes()).unwrap().build().unwrap();
      listener.add_server_name("example.com", alt_ssl).unwrap();

      // `connect_tls` ties the TCP target and the SNI name to the same
      // string, so reaching the loopback listener while asking for a
      // different SNI hostname goes through `upgrade_duplex` over a plain
      // TCP connection instead, the same way a host binding would bridge
      // a stream it dialed itself.
      let tcp = tokio::net::TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
      let client_ssl = ClientSslConfig::builder().reject_unauthorized(false).build().unwrap();
      let mut client_handlers = HandlerSetBuilder::default();
      client_handlers.data = Some(Box::new(|_, _| {}));
      let (client, outcome) = sock_net::upgrade_duplex(
        tcp,
        sock_net::DuplexTlsRole::Client { config: client_ssl, server_name: "example.com".to_string() },
        Rc::new(client_handlers.build().unwrap()),
        idle_timeout(),
      )
      .await
      .unwrap();
      assert!(outcome.authorized);
      assert!(client.get_peer_certificate().is_some());
    })
    .await;
}

#[tokio::test]
async fn add_server_name_rejects_a_non_tls_listener() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let mut server_handlers = HandlerSetBuilder::default();
      server_handlers.data = Some(Box::new(|_, _| {}));
      let config = SocketConfig::builder(Endpoint::TcpHost { host: "127.0.0.1".into(), port: 0 })
        .handlers(server_handlers)
        .idle_timeout(idle_timeout())
        .build()
        .unwrap();
      let listener = ListenContext::bind(config).await.unwrap();

      let alt_ssl = ServerSslConfig::builder().from_pem(TEST_CERT_PEM.as_bytes(), TEST_KEY_PEM.as_bytes()).unwrap().build().unwrap();
      assert!(listener.add_server_name("example.com", alt_ssl).is_err());
    })
    .await;
}

#[tokio::test]
async fn connect_unix_to_nonexistent_path_reports_connect_error() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let mut handlers = HandlerSetBuilder::default();
      handlers.data = Some(Box::new(|_, _| {}));
      let err = ConnectionEngine::connect_unix("/nonexistent/path/to/socket", Rc::new(handlers.build().unwrap()), idle_timeout(), false)
        .await
        .unwrap_err();
      assert!(matches!(err, sock_net::NetError::Connect { code: "ENOENT", .. }));
    })
    .await;
}

#[tokio::test]
async fn listener_stop_force_closes_accepted_connections() {
  tokio::task::LocalSet::new()
    .run_until(async {
      let closed = Rc::new(RefCell::new(false));
      let closed_in_cb = closed.clone();
      let mut server_handlers = HandlerSetBuilder::default();
      server_handlers.data = Some(Box::new(|_, _| {}));
      server_handlers.close = Some(Box::new(move |_, _| {
        *closed_in_cb.borrow_mut() = true;
      }));
      let config = SocketConfig::builder(Endpoint::TcpHost { host: "127.0.0.1".into(), port: 0 })
        .handlers(server_handlers)
        .idle_timeout(idle_timeout())
        .build()
        .unwrap();
      let listener = ListenContext::bind(config).await.unwrap();
      let addr = listener.local_addr().unwrap();

      let mut client_handlers = HandlerSetBuilder::default();
      client_handlers.data = Some(Box::new(|_, _| {}));
      let _client = ConnectionEngine::connect_tcp(&addr.ip().to_string(), addr.port(), Rc::new(client_handlers.build().unwrap()), idle_timeout(), false)
        .await
        .unwrap();
      tokio::time::sleep(Duration::from_millis(50)).await;

      listener.stop(true);
      tokio::time::sleep(Duration::from_millis(50)).await;
      assert!(*closed.borrow());
    })
    .await;
}

#[test]
fn default_binary_type_is_uint8array() {
  assert_eq!(BinaryType::default(), BinaryType::Uint8Array);
}
