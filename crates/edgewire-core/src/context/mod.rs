//! Per-request execution context.
//!
//! A [`Context`] is acquired from a [`ContextPool`] when a message arrives,
//! bound to its connection, loaded with the resolved handler chain and driven
//! with [`Context::next`]. On release every transient field is cleared, so
//! nothing leaks from one request into the next.
//!
//! # Chain execution
//!
//! `next()` advances the cursor and runs the remaining handlers in order
//! until the chain ends or [`Context::stop_execution`] is called. A handler
//! that awaits `ctx.next()` itself gets recursive-continuation semantics:
//! everything downstream runs first, then control returns to it. Every
//! handler runs at most once per request.

mod kv;
mod limited;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::EdgeError;
use crate::foundation::{BoxedConnection, Envelope, Message, Pool, Poolable};
use crate::framework::handler::{BoxFuture, BoxedHandler, Modifier};
use crate::framework::registry::RegisteredContract;
use crate::gateway::{EnvelopeWriter, ExecuteArg};

pub use kv::KvValue;
pub use limited::LimitedContext;

/// Reserved kv key holding the service name.
pub const SERVICE_NAME_KEY: &str = "__ServiceName__";
/// Reserved kv key holding the contract id.
pub const CONTRACT_ID_KEY: &str = "__ContractID__";
/// Reserved kv key holding the matched route.
pub const ROUTE_KEY: &str = "__Route__";

/// Process-wide error sink.
///
/// Receives resolution, handler, forwarding and panic errors. The context is
/// `None` when the failure happened outside any request.
pub type ErrHandler = Arc<dyn Fn(Option<&Context>, &EdgeError) + Send + Sync>;

/// Pool of request contexts.
pub type ContextPool = Pool<Context>;

/// Builds a context pool whose contexts share `envelopes`.
pub fn context_pool(max_idle: usize, envelopes: Arc<Pool<Envelope>>) -> Arc<ContextPool> {
    Arc::new(Pool::new(max_idle, move || {
        Context::new(Arc::clone(&envelopes))
    }))
}

/// Per-request execution state.
pub struct Context {
    conn: Option<BoxedConnection>,
    input: Envelope,
    kv: Mutex<HashMap<String, KvValue>>,
    preset_hdr: Mutex<HashMap<String, String>>,

    handlers: Vec<BoxedHandler>,
    cursor: usize,
    stopped: bool,
    modifiers: Vec<Modifier>,

    writer: Option<Arc<dyn EnvelopeWriter>>,
    error_handler: Option<ErrHandler>,
    forwarded: bool,

    envelopes: Arc<Pool<Envelope>>,
}

impl Context {
    /// Creates a detached context that draws outgoing envelopes from `envelopes`.
    pub fn new(envelopes: Arc<Pool<Envelope>>) -> Self {
        Self {
            conn: None,
            input: Envelope::incoming(),
            kv: Mutex::new(HashMap::new()),
            preset_hdr: Mutex::new(HashMap::new()),
            handlers: Vec::new(),
            cursor: 0,
            stopped: false,
            modifiers: Vec::new(),
            writer: None,
            error_handler: None,
            forwarded: false,
            envelopes,
        }
    }

    /// Binds the connection, the flush path and the error sink.
    pub fn bind(
        &mut self,
        conn: BoxedConnection,
        writer: Arc<dyn EnvelopeWriter>,
        error_handler: Option<ErrHandler>,
    ) {
        self.input.set_conn_hdr(crate::foundation::snapshot(conn.as_ref()));
        self.conn = Some(conn);
        self.writer = Some(writer);
        self.error_handler = error_handler;
    }

    /// Loads the resolved chain and route identity.
    pub(crate) fn prepare(&mut self, arg: &ExecuteArg, entry: &RegisteredContract) {
        {
            let mut kv = self.kv.lock();
            kv.insert(SERVICE_NAME_KEY.into(), KvValue::Str(arg.service_name.clone()));
            kv.insert(CONTRACT_ID_KEY.into(), KvValue::Str(arg.contract_id.clone()));
            kv.insert(ROUTE_KEY.into(), KvValue::Str(arg.route.clone()));
        }
        self.handlers.extend(entry.handlers().iter().cloned());
        self.modifiers.extend(entry.modifiers().iter().cloned());
    }

    // ─── Connection ────────────────────────────────────────────────────────

    pub fn conn(&self) -> Option<&BoxedConnection> {
        self.conn.as_ref()
    }

    pub fn client_ip(&self) -> String {
        self.conn.as_ref().map(|c| c.client_ip()).unwrap_or_default()
    }

    pub fn is_rest(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.as_rest().is_some())
    }

    /// Sets the response status on REST connections; no-op otherwise.
    pub fn set_status_code(&self, code: u16) {
        if let Some(rest) = self.conn.as_ref().and_then(|c| c.as_rest()) {
            rest.set_status_code(code);
        }
    }

    /// True when this context replays a request forwarded by a peer.
    pub fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    pub(crate) fn set_forwarded(&mut self, forwarded: bool) {
        self.forwarded = forwarded;
    }

    // ─── Inbound envelope ──────────────────────────────────────────────────

    pub fn input(&self) -> &Envelope {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Envelope {
        &mut self.input
    }

    /// The inbound message downcast to `T`.
    pub fn in_msg<T: Message>(&self) -> Option<&T> {
        self.input.msg_as::<T>()
    }

    /// A path parameter captured by REST dispatch.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.input.get_hdr(name)
    }

    // ─── Key/value store ───────────────────────────────────────────────────

    pub fn set(&self, key: impl Into<String>, value: impl Into<KvValue>) {
        self.kv.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<KvValue> {
        self.kv.lock().get(key).cloned()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.kv.lock().contains_key(key)
    }

    /// Visits every pair until `f` returns false.
    pub fn walk(&self, mut f: impl FnMut(&str, &KvValue) -> bool) {
        for (k, v) in self.kv.lock().iter() {
            if !f(k, v) {
                break;
            }
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.kv
            .lock()
            .get(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.kv.lock().get(key).and_then(KvValue::as_i64).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.kv.lock().get(key).and_then(KvValue::as_u64).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.kv.lock().get(key).and_then(KvValue::as_f64).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.kv.lock().get(key).and_then(KvValue::as_bool).unwrap_or(default)
    }

    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.kv.lock().get(key).and_then(|v| v.as_bytes().map(<[u8]>::to_vec))
    }

    pub fn service_name(&self) -> String {
        self.get_string(SERVICE_NAME_KEY, "")
    }

    pub fn contract_id(&self) -> String {
        self.get_string(CONTRACT_ID_KEY, "")
    }

    pub fn route(&self) -> String {
        self.get_string(ROUTE_KEY, "")
    }

    // ─── Outgoing envelopes ────────────────────────────────────────────────

    /// Adds a header that every subsequent [`out`](Self::out) envelope starts with.
    pub fn preset_hdr(&self, key: impl Into<String>, value: impl Into<String>) {
        self.preset_hdr.lock().insert(key.into(), value.into());
    }

    pub fn preset_hdr_map<I, K, V>(&self, hdr: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut preset = self.preset_hdr.lock();
        for (k, v) in hdr {
            preset.insert(k.into(), v.into());
        }
    }

    /// A fresh outgoing envelope carrying the preset headers and the inbound
    /// envelope id.
    pub fn out(&self) -> Envelope {
        let mut env = self.envelopes.acquire();
        env.set_outgoing(true);
        env.set_id(self.input.id());
        env.set_hdr_map(
            self.preset_hdr
                .lock()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env
    }

    /// Applies the modifiers (last registered first) and flushes `env`.
    ///
    /// May be called any number of times per request. Failures go to the
    /// error handler; the envelope always returns to its pool.
    pub async fn send(&self, mut env: Envelope) {
        for m in self.modifiers.iter().rev() {
            m(&mut env);
        }
        self.flush(env).await;
    }

    /// Writes `env` as is. Relayed replies were already modified by the peer.
    pub(crate) async fn flush(&self, env: Envelope) {
        match (&self.conn, &self.writer) {
            (Some(conn), Some(writer)) => {
                if let Err(e) = writer.write(conn.as_ref(), &env).await {
                    self.error(e);
                }
            }
            _ => self.error(EdgeError::WriteToClosedConn),
        }

        self.envelopes.release(env);
    }

    /// Reports `err` to the process-wide error handler.
    pub fn error(&self, err: EdgeError) {
        match &self.error_handler {
            Some(eh) => eh(Some(self), &err),
            None => error!(
                service = %self.service_name(),
                route = %self.route(),
                error = %err,
                "Unhandled request error"
            ),
        }
    }

    // ─── Chain driving ─────────────────────────────────────────────────────

    /// Appends handlers to the chain.
    pub fn add_handlers(&mut self, handlers: impl IntoIterator<Item = BoxedHandler>) {
        self.handlers.extend(handlers);
    }

    pub fn add_modifiers(&mut self, modifiers: impl IntoIterator<Item = Modifier>) {
        self.modifiers.extend(modifiers);
    }

    /// Runs the rest of the chain.
    pub fn next(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.cursor += 1;
            while !self.stopped && self.cursor <= self.handlers.len() {
                let handler = Arc::clone(&self.handlers[self.cursor - 1]);
                handler.handle(self).await;
                self.cursor += 1;
            }
        })
    }

    /// No handler after the current one will run.
    pub fn stop_execution(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// One-based position of the running handler; zero before the chain starts.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor forward; used to resume a forwarded chain.
    pub(crate) fn skip_to(&mut self, cursor: usize) {
        if cursor > self.cursor {
            debug!(from = self.cursor, to = cursor, "Skipping handlers");
            self.cursor = cursor;
        }
    }

    /// Handler chain length.
    pub fn chain_len(&self) -> usize {
        self.handlers.len()
    }

    /// A capability-restricted view for edge selectors.
    pub fn limited(&self) -> LimitedContext<'_> {
        LimitedContext::new(self)
    }
}

impl Poolable for Context {
    fn reset(&mut self) {
        self.conn = None;
        self.input.reset();
        self.kv.get_mut().clear();
        self.preset_hdr.get_mut().clear();
        self.handlers.clear();
        self.cursor = 0;
        self.stopped = false;
        self.modifiers.clear();
        self.writer = None;
        self.error_handler = None;
        self.forwarded = false;
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("conn_id", &self.conn.as_ref().map(|c| c.id()))
            .field("input", &self.input)
            .field("cursor", &self.cursor)
            .field("chain_len", &self.handlers.len())
            .field("stopped", &self.stopped)
            .field("forwarded", &self.forwarded)
            .finish_non_exhaustive()
    }
}
