// Copyright 2018-2026 the Deno authors. MIT license.

use crate::error::NetError;

/// A tagged endpoint, matching spec.md §3's `Endpoint` variant. String
/// payloads are owned copies — the engine never borrows from the caller's
/// original strings, which may be freed immediately after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  TcpHost { host: String, port: u16 },
  Unix { path: String },
  Fd { fd: RawHandle },
  /// Windows-only; must match `\\{.|?}\pipe\<non-separator>…`.
  Pipe { name: String },
}

/// A native handle identifier. On Unix this is a file descriptor; on
/// Windows it is whatever raw value the host's handle table hands us
/// (the platform-specific upgrade to an actual `RawFd`/`RawSocket` happens
/// at the point a `ConnectionEngine` is built from this endpoint).
pub type RawHandle = i32;

impl Endpoint {
  /// Parses the `host`/`hostname` option (may embed a port via a URL) plus
  /// an explicit `port`, per spec.md §6.
  pub fn tcp_from_host_and_port(host_or_url: &str, explicit_port: Option<u16>) -> Result<Self, NetError> {
    if let Ok(parsed) = url::Url::parse(host_or_url) {
      if let Some(host) = parsed.host_str() {
        let port = parsed.port().or(explicit_port).ok_or_else(|| NetError::invalid_arguments("port required"))?;
        return Ok(Endpoint::TcpHost { host: host.to_string(), port });
      }
    }
    let port = explicit_port.ok_or_else(|| NetError::invalid_arguments("port required alongside hostname"))?;
    Ok(Endpoint::TcpHost { host: host_or_url.to_string(), port })
  }

  /// Parses the `unix` option, stripping an optional `file://`/`unix://`/
  /// `sock://` prefix per spec.md §6.
  pub fn unix_from_str(raw: &str) -> Result<Self, NetError> {
    if raw.is_empty() {
      return Err(NetError::invalid_arguments("empty unix path"));
    }
    for prefix in ["unix://", "sock://", "file://"] {
      if let Some(rest) = raw.strip_prefix(prefix) {
        return Ok(Endpoint::Unix { path: rest.to_string() });
      }
    }
    Ok(Endpoint::Unix { path: raw.to_string() })
  }

  pub fn fd(fd: RawHandle) -> Self {
    Endpoint::Fd { fd }
  }

  /// Windows named pipe endpoint, per spec.md §4.7. Validated regardless of
  /// host platform so the same `SocketConfig` construction path produces
  /// the same `InvalidArguments` error everywhere; only connecting to it
  /// is platform-gated.
  pub fn pipe(name: &str) -> Result<Self, NetError> {
    if !is_pipe_name(name) {
      return Err(NetError::invalid_arguments(format!("invalid pipe name: {name}")));
    }
    Ok(Endpoint::Pipe { name: name.to_string() })
  }

  pub fn is_pipe(&self) -> bool {
    matches!(self, Endpoint::Pipe { .. })
  }
}

/// `\\{.|?}\pipe\<non-separator>…`
fn is_pipe_name(name: &str) -> bool {
  for root in [r"\\.\pipe\", r"\\?\pipe\"] {
    if let Some(rest) = name.strip_prefix(root) {
      return !rest.is_empty() && !rest.contains('\\');
    }
  }
  false
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tcp_host_requires_port() {
    assert!(Endpoint::tcp_from_host_and_port("example.com", None).is_err());
    assert!(matches!(
      Endpoint::tcp_from_host_and_port("example.com", Some(80)).unwrap(),
      Endpoint::TcpHost { port: 80, .. }
    ));
  }

  #[test]
  fn tcp_host_extracts_port_from_url() {
    let ep = Endpoint::tcp_from_host_and_port("tcp://example.com:9000", None).unwrap();
    assert_eq!(ep, Endpoint::TcpHost { host: "example.com".to_string(), port: 9000 });
  }

  #[test]
  fn unix_strips_recognised_prefixes() {
    assert_eq!(Endpoint::unix_from_str("unix:///tmp/s.sock").unwrap(), Endpoint::Unix { path: "/tmp/s.sock".to_string() });
    assert_eq!(Endpoint::unix_from_str("/tmp/s.sock").unwrap(), Endpoint::Unix { path: "/tmp/s.sock".to_string() });
  }

  #[test]
  fn unix_rejects_empty_path() {
    assert!(Endpoint::unix_from_str("").is_err());
  }

  #[test]
  fn port_boundaries() {
    assert!(Endpoint::tcp_from_host_and_port("h", Some(0)).is_ok());
    assert!(Endpoint::tcp_from_host_and_port("h", Some(65535)).is_ok());
  }

  #[test]
  fn pipe_name_validation() {
    assert!(Endpoint::pipe(r"\\.\pipe\mypipe").is_ok());
    assert!(Endpoint::pipe(r"\\?\pipe\mypipe").is_ok());
    assert!(Endpoint::pipe(r"\\.\pipe\").is_err());
    assert!(Endpoint::pipe(r"\\.\pipe\a\b").is_err());
    assert!(Endpoint::pipe("not a pipe").is_err());
  }
}
