// Copyright 2018-2026 the Deno authors. MIT license.

use sock_tls::TlsError;

/// The error taxonomy from spec.md §7. Each variant carries the structured
/// context the spec requires callers be able to surface (`syscall`, `code`,
/// `errno`, `address`, `port`) rather than a pre-rendered message, so a host
/// binding can translate it into whatever exception shape its scripting
/// runtime expects without re-parsing a string.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
  /// User-supplied shape wrong; thrown synchronously on the calling side.
  #[error("invalid arguments: {0}")]
  InvalidArguments(String),

  /// Operation invalid for the engine's current state.
  #[error("invalid state: {0}")]
  InvalidState(&'static str),

  /// Transport-level connect/bind failure.
  #[error("{syscall} failed: {code} ({message})")]
  Connect {
    syscall: &'static str,
    code: &'static str,
    errno: i32,
    message: String,
    address: Option<String>,
    port: Option<u16>,
  },

  /// Runtime I/O failure during an established connection, surfaced
  /// through the `close` callback's err argument.
  #[error("read error: {0}")]
  Read(#[source] std::io::Error),

  /// From the TLS library's error queue.
  #[error("tls error: {0}")]
  Tls(#[from] TlsError),

  /// write/end on a closed or shut-down engine; never thrown, returns -1.
  #[error("shutdown")]
  Shutdown,
}

impl NetError {
  pub fn invalid_arguments(msg: impl Into<String>) -> Self {
    NetError::InvalidArguments(msg.into())
  }

  pub fn invalid_state(msg: &'static str) -> Self {
    NetError::InvalidState(msg)
  }

  /// Reconstructs an equivalent `NetError` for delivery to a second
  /// callback. A read/TLS failure fires both the `error` handler (if
  /// registered) and the terminal `close` handler's err argument
  /// (spec.md §4.3/§7); since `std::io::Error` is not `Clone`, this
  /// rebuilds the `Read` variant from its kind and message rather than
  /// requiring the whole enum to implement `Clone`.
  pub fn duplicate(&self) -> NetError {
    match self {
      NetError::InvalidArguments(s) => NetError::InvalidArguments(s.clone()),
      NetError::InvalidState(s) => NetError::InvalidState(s),
      NetError::Connect { syscall, code, errno, message, address, port } => NetError::Connect {
        syscall,
        code,
        errno: *errno,
        message: message.clone(),
        address: address.clone(),
        port: *port,
      },
      NetError::Read(e) => NetError::Read(std::io::Error::new(e.kind(), e.to_string())),
      NetError::Tls(e) => NetError::Tls(e.duplicate()),
      NetError::Shutdown => NetError::Shutdown,
    }
  }

  /// Builds a `ConnectError`/`Listen` error from a raw `io::Error`,
  /// classifying the errno the way spec.md §4.2/§4.3 describes: ENOENT for
  /// a missing unix path, ECONNREFUSED otherwise, with UV-namespaced
  /// substitution on Windows (spec.md §7).
  pub fn from_connect_io(syscall: &'static str, err: &std::io::Error, address: Option<String>, port: Option<u16>) -> Self {
    let errno = err.raw_os_error().unwrap_or(-1);
    let code = classify_code(err);
    NetError::Connect {
      syscall,
      code,
      errno,
      message: err.to_string(),
      address,
      port,
    }
  }
}

fn classify_code(err: &std::io::Error) -> &'static str {
  use std::io::ErrorKind::*;
  match err.kind() {
    NotFound => "ENOENT",
    ConnectionRefused => "ECONNREFUSED",
    PermissionDenied => "EACCES",
    AddrInUse => "EADDRINUSE",
    AddrNotAvailable => "EADDRNOTAVAIL",
    TimedOut => "ETIMEDOUT",
    ConnectionReset => "ECONNRESET",
    _ => windows_errno_name(err).unwrap_or("UNKNOWN"),
  }
}

/// On Windows, libuv-namespaced errno variants are substituted for the
/// equivalent POSIX code (spec.md §7). Non-Windows builds never reach
/// this classification path since `classify_code` already covers the
/// common POSIX kinds above.
#[cfg(windows)]
fn windows_errno_name(err: &std::io::Error) -> Option<&'static str> {
  match err.raw_os_error() {
    // WSAECONNREFUSED
    Some(10061) => Some("ECONNREFUSED"),
    // WSAECONNRESET
    Some(10054) => Some("ECONNRESET"),
    // ERROR_FILE_NOT_FOUND / ERROR_PATH_NOT_FOUND
    Some(2) | Some(3) => Some("ENOENT"),
    _ => None,
  }
}

#[cfg(not(windows))]
fn windows_errno_name(_err: &std::io::Error) -> Option<&'static str> {
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_unix_path_classifies_enoent() {
    let io_err = std::io::Error::from(std::io::ErrorKind::NotFound);
    let err = NetError::from_connect_io("connect", &io_err, Some("/nonexistent/path".into()), None);
    match err {
      NetError::Connect { code, .. } => assert_eq!(code, "ENOENT"),
      _ => panic!("wrong variant"),
    }
  }

  #[test]
  fn refused_classifies_econnrefused() {
    let io_err = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
    let err = NetError::from_connect_io("connect", &io_err, None, Some(80));
    match err {
      NetError::Connect { code, .. } => assert_eq!(code, "ECONNREFUSED"),
      _ => panic!("wrong variant"),
    }
  }
}
