// Copyright 2018-2026 the Deno authors. MIT license.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use crate::error::NetError;
use crate::payload::BinaryType;

/// A non-owning reference to a live `ConnectionEngine`, handed to callbacks
/// instead of a direct `&mut Engine` borrow. Every callback site in this
/// crate clones a `ConnectionHandle` and lets the callback re-enter the
/// engine (to `write`, `close`, …) through its own interior-mutable borrow,
/// which sidesteps the self-referential-borrow problem of a callback that
/// is itself stored inside the engine it is called with.
///
/// This is the Rust-native rendering of spec.md §9's note that the nine
/// callbacks "may alternatively expose a single polymorphic trait" — here
/// they are boxed closures rather than trait methods, since the spec's
/// per-construction presence check (`MissingCallback`) needs to observe
/// which slots are populated, which a trait's default-method dispatch
/// can't express.
pub type ConnectionHandle = Rc<dyn crate::engine::EngineControl>;

/// A script-supplied callable, modeled as a boxed closure. The host
/// scripting runtime's actual callable invocation and argument coercion
/// are out of scope (spec.md §1); this type is the seam a host binding
/// plugs into.
pub type Callback<A> = Box<dyn FnMut(ConnectionHandle, A)>;

pub type DataCallback = Callback<DataEvent>;
pub type DrainCallback = Box<dyn FnMut(ConnectionHandle)>;
pub type OpenCallback = Box<dyn FnMut(ConnectionHandle)>;
pub type CloseCallback = Callback<Option<NetError>>;
pub type TimeoutCallback = Box<dyn FnMut(ConnectionHandle)>;
pub type ConnectErrorCallback = Box<dyn FnMut(NetError)>;
pub type EndCallback = Box<dyn FnMut(ConnectionHandle)>;
pub type ErrorCallback = Callback<NetError>;
pub type HandshakeCallback = Callback<HandshakeEvent>;

#[derive(Debug, Clone)]
pub struct DataEvent {
  pub bytes: Rc<[u8]>,
  pub binary_type: BinaryType,
}

#[derive(Debug, Clone)]
pub struct HandshakeEvent {
  pub authorized: bool,
  pub verify_error: Option<String>,
}

/// The record of user callbacks and shared config (spec.md §3/§4.1).
///
/// Every callback slot is behind its own `RefCell`: a `HandlerSet` is
/// shared (via `Rc`) across every `ConnectionEngine` accepted under one
/// listener, so invoking a callback can never go through a `&mut
/// HandlerSet` — only one engine at a time ever borrows one slot, but many
/// engines hold the same `Rc<HandlerSet>` concurrently in the sense of
/// "simultaneously alive", even though execution itself is single-threaded
/// (spec.md §5).
pub struct HandlerSet {
  pub data: RefCell<Option<DataCallback>>,
  pub drain: RefCell<Option<DrainCallback>>,
  pub open: RefCell<Option<OpenCallback>>,
  pub close: RefCell<Option<CloseCallback>>,
  pub timeout: RefCell<Option<TimeoutCallback>>,
  pub connect_error: RefCell<Option<ConnectErrorCallback>>,
  pub end: RefCell<Option<EndCallback>>,
  pub error: RefCell<Option<ErrorCallback>>,
  pub handshake: RefCell<Option<HandshakeCallback>>,

  pub binary_type: BinaryType,
  pub is_server: bool,
  active_connections: Cell<u32>,
}

/// Constructs a `HandlerSet` from individually-supplied, already-coerced
/// callback slots. A host binding is the thing that performs the "plain
/// object shape" validation spec.md §4.1 describes (checking that each
/// present value actually is callable) before handing slots here — that
/// coercion is the out-of-scope argument-coercion layer. What this
/// constructor enforces is the one invariant that belongs to the core
/// itself: at least one of `data`/`drain` must be present.
#[derive(Default)]
pub struct HandlerSetBuilder {
  pub data: Option<DataCallback>,
  pub drain: Option<DrainCallback>,
  pub open: Option<OpenCallback>,
  pub close: Option<CloseCallback>,
  pub timeout: Option<TimeoutCallback>,
  pub connect_error: Option<ConnectErrorCallback>,
  pub end: Option<EndCallback>,
  pub error: Option<ErrorCallback>,
  pub handshake: Option<HandshakeCallback>,
  pub binary_type: BinaryType,
  pub is_server: bool,
}

impl HandlerSetBuilder {
  pub fn build(self) -> Result<HandlerSet, NetError> {
    if self.data.is_none() && self.drain.is_none() {
      return Err(NetError::invalid_arguments("HandlerSet requires at least one of `data` or `drain`"));
    }
    Ok(HandlerSet {
      data: RefCell::new(self.data),
      drain: RefCell::new(self.drain),
      open: RefCell::new(self.open),
      close: RefCell::new(self.close),
      timeout: RefCell::new(self.timeout),
      connect_error: RefCell::new(self.connect_error),
      end: RefCell::new(self.end),
      error: RefCell::new(self.error),
      handshake: RefCell::new(self.handshake),
      binary_type: self.binary_type,
      is_server: self.is_server,
      active_connections: Cell::new(0),
    })
  }
}

impl HandlerSet {
  pub fn active_connections(&self) -> u32 {
    self.active_connections.get()
  }

  /// Increments `activeConnections` and returns a scope whose `Drop`
  /// decrements it, guaranteeing the pairing holds even if the caller's
  /// callback body panics partway through (spec.md §4.1's `enter()`).
  ///
  /// Opening/closing an actual host-event-loop turn is the out-of-scope
  /// scripting runtime's job; this only tracks the reference count that
  /// governs `HandlerSet` teardown (spec.md I5).
  pub fn enter(self: &Rc<Self>) -> ActiveScope {
    self.active_connections.set(self.active_connections.get() + 1);
    ActiveScope { handlers: self.clone() }
  }

  /// `callErrorHandler(thisVal, err)`: invokes `error`; if absent,
  /// surfaces `err` to the host as uncaught. Errors thrown from the error
  /// handler itself are reported uncaught, never recursed (spec.md §4.1).
  pub fn call_error_handler(&self, conn: ConnectionHandle, err: NetError) {
    if let Some(cb) = self.error.borrow_mut().as_mut() {
      cb(conn, err);
    } else {
      report_uncaught(err);
    }
  }
}

pub struct ActiveScope {
  handlers: Rc<HandlerSet>,
}

impl Drop for ActiveScope {
  fn drop(&mut self) {
    let n = self.handlers.active_connections.get();
    debug_assert!(n > 0, "activeConnections underflow");
    self.handlers.active_connections.set(n.saturating_sub(1));
  }
}

/// The fallback path for an error that has nowhere else to go: surfaced to
/// the host as an uncaught exception. The actual exception-raising
/// mechanism belongs to the out-of-scope scripting runtime; this just logs,
/// which is the seam a host binding overrides by routing `log` records (or
/// a custom panic/abort hook) into its own uncaught-exception reporter.
pub fn report_uncaught(err: NetError) {
  log::error!("uncaught error in socket callback: {err}");
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn requires_data_or_drain() {
    let builder = HandlerSetBuilder::default();
    assert!(builder.build().is_err());
  }

  #[test]
  fn data_alone_is_sufficient() {
    let mut builder = HandlerSetBuilder::default();
    builder.data = Some(Box::new(|_, _| {}));
    assert!(builder.build().is_ok());
  }

  #[test]
  fn enter_exit_balances_active_connections() {
    let mut builder = HandlerSetBuilder::default();
    builder.drain = Some(Box::new(|_| {}));
    let handlers = Rc::new(builder.build().unwrap());
    assert_eq!(handlers.active_connections(), 0);
    {
      let _scope = handlers.enter();
      assert_eq!(handlers.active_connections(), 1);
    }
    assert_eq!(handlers.active_connections(), 0);
  }
}
