// Copyright 2018-2026 the Deno authors. MIT license.
//
// `ListenContext` (spec.md §4.2): binds a TCP endpoint, a UNIX path, or a
// Windows pipe, and drives the accept loop that constructs a
// `ConnectionEngine` per inbound connection.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::rc::Rc;
use std::rc::Weak;
use std::time::Duration;

use socket2::Domain;
use socket2::Socket;
use socket2::Type;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::config::apply_socket_options;
use crate::config::SocketConfig;
use crate::endpoint::Endpoint;
use crate::engine::ConnectionEngine;
use crate::error::NetError;
use crate::handler::HandlerSet;
#[cfg(windows)]
use crate::pipe::PipeListener;
use crate::transport::RawTransport;

enum BoundListener {
  Tcp(TcpListener),
  #[cfg(unix)]
  Unix(UnixListener),
  #[cfg(windows)]
  Pipe(PipeListener),
}

/// A live listening socket. Cloning shares the same underlying state; the
/// accept loop itself holds its own strong reference (spec.md §4.2:
/// "maintains a strong self-reference while listening"), so a caller may
/// drop every `ListenContext` handle and the listener keeps running until
/// `stop()` is called.
#[derive(Clone)]
pub struct ListenContext {
  inner: Rc<ListenInner>,
}

struct ListenInner {
  handlers: RefCell<Rc<HandlerSet>>,
  ssl: RefCell<Option<sock_tls::ServerSslConfig>>,
  sni: RefCell<HashMap<String, sock_tls::ServerSslConfig>>,
  idle_timeout: Duration,
  accepting: Cell<bool>,
  /// Tracked so `stop(true)` can reach back into every connection
  /// accepted under this listener and force-close it. `Weak` rather than
  /// `Rc` so a connection closing on its own (unrelated to the listener)
  /// still frees its `EngineInner` without waiting for `stop()`.
  connections: RefCell<Vec<Weak<dyn crate::engine::EngineControl>>>,
  default_data: Option<Rc<dyn std::any::Any>>,
  local_addr: Option<SocketAddr>,
  allow_half_open: bool,
}

impl ListenContext {
  /// Binds per spec.md §4.2/§6. On failure, synthesizes the Listen error
  /// `{syscall:"listen", errno, address, port?, code}` described there.
  pub async fn bind(config: SocketConfig) -> Result<Self, NetError> {
    let ssl = match config.ssl {
      Some(sock_tls::SslConfig::Server(s)) => Some(s),
      Some(sock_tls::SslConfig::Default) | Some(sock_tls::SslConfig::Client(_)) => {
        return Err(NetError::invalid_arguments("listen requires a server-side SslConfig"));
      }
      None => None,
    };
    let handlers = Rc::new(config.handlers.build()?);
    let default_data: Option<Rc<dyn std::any::Any>> = config.default_data.map(Rc::from);

    let listener = bind_listener(&config.endpoint, config.exclusive, config.reuse_port, config.ipv6_only).await?;
    let local_addr = match &listener {
      BoundListener::Tcp(l) => l.local_addr().ok(),
      #[cfg(unix)]
      BoundListener::Unix(_) => None,
      #[cfg(windows)]
      BoundListener::Pipe(_) => None,
    };

    let inner = Rc::new(ListenInner {
      handlers: RefCell::new(handlers),
      ssl: RefCell::new(ssl),
      sni: RefCell::new(HashMap::new()),
      idle_timeout: config.idle_timeout,
      accepting: Cell::new(true),
      connections: RefCell::new(Vec::new()),
      default_data,
      local_addr,
      allow_half_open: config.allow_half_open,
    });
    let ctx = Self { inner };
    ctx.spawn_accept_loop(listener);
    Ok(ctx)
  }

  fn spawn_accept_loop(&self, listener: BoundListener) {
    let inner = self.inner.clone();
    tokio::task::spawn_local(async move {
      let mut listener = listener;
      loop {
        if !inner.accepting.get() {
          return;
        }
        let accepted = accept_once(&mut listener).await;
        if !inner.accepting.get() {
          return;
        }
        let transport = match accepted {
          Ok(t) => t,
          Err(e) => {
            log::warn!("accept failed: {e}");
            continue;
          }
        };
        let handlers = inner.handlers.borrow().clone();
        let idle_timeout = inner.idle_timeout;
        let ssl = inner.ssl.borrow().clone();
        match ssl {
          None => {
            let engine = ConnectionEngine::from_accepted(transport, handlers, idle_timeout, inner.allow_half_open);
            engine.set_default_data(inner.default_data.clone());
            inner.connections.borrow_mut().push(Rc::downgrade(&engine.handle()));
            engine.fire_open();
          }
          Some(ssl_config) => {
            // `addServerName()` (spec.md §4.2) registers per-host
            // alternates; route this handshake's SNI through all of them
            // via a combined cert resolver rather than always presenting
            // the listener's original certificate.
            let sni_map = inner.sni.borrow();
            let ssl_config = if sni_map.is_empty() { ssl_config } else { sock_tls::server_config_with_sni(&ssl_config, &sni_map) };
            drop(sni_map);
            let inner = inner.clone();
            tokio::task::spawn_local(async move {
              match ConnectionEngine::accept_tls(transport, &ssl_config, handlers.clone(), idle_timeout, inner.allow_half_open).await {
                Ok((engine, outcome)) => {
                  engine.set_default_data(inner.default_data.clone());
                  inner.connections.borrow_mut().push(Rc::downgrade(&engine.handle()));
                  let has_handshake_cb = handlers.handshake.borrow().is_some();
                  engine.fire_open();
                  if has_handshake_cb {
                    engine.fire_handshake(&outcome);
                  }
                }
                Err(e) => {
                  log::debug!("TLS accept failed: {e}");
                }
              }
            });
          }
        }
      }
    });
  }

  /// `reload(newHandlers)`: atomically swaps the `HandlerSet` used for
  /// connections accepted from now on. Per spec.md §11 (REDESIGN FLAGS),
  /// the previous `HandlerSet` is simply dropped here — it is freed once
  /// its `activeConnections` count (held by the connections still using
  /// it) reaches zero, since `Rc<HandlerSet>` is what those connections
  /// hold, not a reference through this listener.
  pub fn reload(&self, new_handlers: Rc<HandlerSet>) {
    *self.inner.handlers.borrow_mut() = new_handlers;
  }

  /// `addServerName(host, sslConfig)`: TLS only. Replaces an existing SNI
  /// mapping for `host` if present.
  pub fn add_server_name(&self, host: &str, config: sock_tls::ServerSslConfig) -> Result<(), NetError> {
    if host.is_empty() {
      return Err(NetError::invalid_arguments("addServerName requires a non-empty host"));
    }
    if self.inner.ssl.borrow().is_none() {
      return Err(NetError::invalid_state("addServerName requires a TLS listener"));
    }
    self.inner.sni.borrow_mut().insert(host.to_string(), config);
    Ok(())
  }

  /// `stop(forceClose)`. Non-force: stops accepting immediately (the
  /// accept loop observes `accepting == false` and returns, dropping the
  /// listening socket) but leaves in-flight connections to drain
  /// naturally. Force: additionally closes every tracked connection.
  pub fn stop(&self, force_close: bool) {
    self.inner.accepting.set(false);
    if force_close {
      for weak in self.inner.connections.borrow_mut().drain(..) {
        if let Some(handle) = weak.upgrade() {
          handle.close(false);
        }
      }
    }
  }

  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.inner.local_addr
  }
}

async fn accept_once(listener: &mut BoundListener) -> Result<RawTransport, NetError> {
  match listener {
    BoundListener::Tcp(l) => {
      let (stream, _addr) = l.accept().await.map_err(|e| NetError::from_connect_io("accept", &e, None, None))?;
      stream.set_nodelay(true).ok();
      Ok(RawTransport::Tcp(stream))
    }
    #[cfg(unix)]
    BoundListener::Unix(l) => {
      let (stream, _addr) = l.accept().await.map_err(|e| NetError::from_connect_io("accept", &e, None, None))?;
      Ok(RawTransport::Unix(stream))
    }
    #[cfg(windows)]
    BoundListener::Pipe(l) => {
      let stream = l.accept().await?;
      Ok(RawTransport::Pipe(stream))
    }
  }
}

/// Binds the transport-level listening socket. TCP goes through
/// `socket2` so `reusePort`/`ipv6Only`/`exclusive` (spec.md §10.5) can be
/// applied before `listen(2)`; UNIX and pipe listeners have no equivalent
/// knobs in this crate's scope.
async fn bind_listener(endpoint: &Endpoint, exclusive: bool, reuse_port: bool, ipv6_only: bool) -> Result<BoundListener, NetError> {
  match endpoint {
    Endpoint::TcpHost { host, port } => {
      let addr = resolve_tcp_addr(host, *port)?;
      let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
      let socket = Socket::new(domain, Type::STREAM, None).map_err(|e| NetError::from_connect_io("listen", &e, Some(host.clone()), Some(*port)))?;
      // `exclusive` (spec.md §3/§6) maps onto `SO_REUSEADDR`: a non-exclusive
      // listener allows a fast rebind of a recently-closed address; an
      // exclusive one refuses to share the address at all.
      socket
        .set_reuse_address(!exclusive)
        .map_err(|e| NetError::from_connect_io("listen", &e, Some(host.clone()), Some(*port)))?;
      apply_socket_options(&socket, reuse_port, if addr.is_ipv6() { Some(ipv6_only) } else { None })
        .map_err(|e| NetError::from_connect_io("listen", &e, Some(host.clone()), Some(*port)))?;
      socket
        .bind(&addr.into())
        .map_err(|e| NetError::from_connect_io("listen", &e, Some(host.clone()), Some(*port)))?;
      socket
        .listen(1024)
        .map_err(|e| NetError::from_connect_io("listen", &e, Some(host.clone()), Some(*port)))?;
      socket
        .set_nonblocking(true)
        .map_err(|e| NetError::from_connect_io("listen", &e, Some(host.clone()), Some(*port)))?;
      let std_listener: std::net::TcpListener = socket.into();
      let listener = TcpListener::from_std(std_listener).map_err(|e| NetError::from_connect_io("listen", &e, Some(host.clone()), Some(*port)))?;
      Ok(BoundListener::Tcp(listener))
    }
    #[cfg(unix)]
    Endpoint::Unix { path } => {
      let listener = UnixListener::bind(path).map_err(|e| NetError::from_connect_io("listen", &e, Some(path.clone()), None))?;
      Ok(BoundListener::Unix(listener))
    }
    #[cfg(not(unix))]
    Endpoint::Unix { .. } => Err(NetError::invalid_state("unix sockets are not supported on this platform")),
    #[cfg(windows)]
    Endpoint::Pipe { name } => Ok(BoundListener::Pipe(PipeListener::bind(name)?)),
    #[cfg(not(windows))]
    Endpoint::Pipe { .. } => Err(NetError::invalid_state("named pipes are only supported on Windows")),
    Endpoint::Fd { .. } => Err(NetError::invalid_arguments("listen does not support an fd endpoint")),
  }
}

fn resolve_tcp_addr(host: &str, port: u16) -> Result<SocketAddr, NetError> {
  (host, port)
    .to_socket_addrs()
    .map_err(|e| NetError::from_connect_io("getaddrinfo", &e, Some(host.to_string()), Some(port)))?
    .next()
    .ok_or_else(|| NetError::invalid_arguments(format!("could not resolve {host}")))
}
