// Copyright 2018-2026 the Deno authors. MIT license.

use std::time::Duration;

use sock_tls::SslConfig;

use crate::endpoint::Endpoint;
use crate::error::NetError;
use crate::handler::HandlerSetBuilder;
use crate::payload::BinaryType;

/// Construction-time record for a listener or outbound connection
/// (spec.md §3 `SocketConfig`, §6 configuration surface). `endpoint` /
/// `ssl` / `handlers` are required; the rest default per §6.
pub struct SocketConfig {
  pub endpoint: Endpoint,
  pub ssl: Option<SslConfig>,
  pub handlers: HandlerSetBuilder,
  pub default_data: Option<Box<dyn std::any::Any>>,
  pub exclusive: bool,
  pub allow_half_open: bool,
  pub reuse_port: bool,
  pub ipv6_only: bool,
  pub idle_timeout: Duration,
}

impl SocketConfig {
  pub fn builder(endpoint: Endpoint) -> SocketConfigBuilder {
    SocketConfigBuilder {
      endpoint,
      ssl: None,
      handlers: HandlerSetBuilder::default(),
      default_data: None,
      exclusive: false,
      allow_half_open: false,
      reuse_port: false,
      ipv6_only: false,
      idle_timeout: Duration::from_secs(120),
    }
  }
}

/// Builder for `SocketConfig`, the ergonomic constructor path §10.3 adds
/// atop the flat record spec.md §3 describes — every host binding in the
/// corpus assembles its own config type this way rather than positionally.
pub struct SocketConfigBuilder {
  endpoint: Endpoint,
  ssl: Option<SslConfig>,
  handlers: HandlerSetBuilder,
  default_data: Option<Box<dyn std::any::Any>>,
  exclusive: bool,
  allow_half_open: bool,
  reuse_port: bool,
  ipv6_only: bool,
  idle_timeout: Duration,
}

impl SocketConfigBuilder {
  pub fn ssl(mut self, ssl: SslConfig) -> Self {
    self.ssl = Some(ssl);
    self
  }

  pub fn handlers(mut self, handlers: HandlerSetBuilder) -> Self {
    self.handlers = handlers;
    self
  }

  pub fn default_data(mut self, data: Box<dyn std::any::Any>) -> Self {
    self.default_data = Some(data);
    self
  }

  pub fn exclusive(mut self, exclusive: bool) -> Self {
    self.exclusive = exclusive;
    self
  }

  /// When set, `HalfClosedRemote` still permits local writes; the local
  /// side must call `end()`/`shutdown()` itself to finish the close
  /// (§10.5, expanding on the underspecified `allowHalfOpen` flag).
  pub fn allow_half_open(mut self, allow: bool) -> Self {
    self.allow_half_open = allow;
    self
  }

  pub fn reuse_port(mut self, reuse: bool) -> Self {
    self.reuse_port = reuse;
    self
  }

  pub fn ipv6_only(mut self, only: bool) -> Self {
    self.ipv6_only = only;
    self
  }

  pub fn binary_type(mut self, binary_type: BinaryType) -> Self {
    self.handlers.binary_type = binary_type;
    self
  }

  pub fn idle_timeout(mut self, timeout: Duration) -> Self {
    self.idle_timeout = timeout;
    self
  }

  pub fn build(self) -> Result<SocketConfig, NetError> {
    Ok(SocketConfig {
      endpoint: self.endpoint,
      ssl: self.ssl,
      handlers: self.handlers,
      default_data: self.default_data,
      exclusive: self.exclusive,
      allow_half_open: self.allow_half_open,
      reuse_port: self.reuse_port,
      ipv6_only: self.ipv6_only,
      idle_timeout: self.idle_timeout,
    })
  }
}

/// Applies `reusePort`/`ipv6Only` to a not-yet-bound `socket2::Socket`
/// (§10.5: these options are named but not wired in spec.md §6).
pub fn apply_socket_options(socket: &socket2::Socket, reuse_port: bool, ipv6_only: Option<bool>) -> std::io::Result<()> {
  #[cfg(unix)]
  if reuse_port {
    socket.set_reuse_port(true)?;
  }
  #[cfg(not(unix))]
  let _ = reuse_port;
  if let Some(only) = ipv6_only {
    socket.set_only_v6(only)?;
  }
  Ok(())
}
