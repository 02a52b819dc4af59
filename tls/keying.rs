// Copyright 2018-2026 the Deno authors. MIT license.

use rustls::ConnectionCommon;

use crate::error::TlsError;

/// `exportKeyingMaterial(length, label, context?)`: RFC 5705 keying
/// material export, delegated directly to rustls's own implementation
/// once the handshake has completed.
pub fn export_keying_material<T>(
  conn: &ConnectionCommon<T>,
  length: usize,
  label: &str,
  context: Option<&[u8]>,
) -> Result<Vec<u8>, TlsError> {
  let mut out = vec![0u8; length];
  conn
    .export_keying_material(&mut out, label.as_bytes(), context)
    .map_err(TlsError::from)?;
  Ok(out)
}
