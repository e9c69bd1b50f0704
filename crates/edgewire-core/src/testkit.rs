//! In-memory connections, gateways and error sinks for tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature, for
//! downstream crates.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::context::{Context, ErrHandler};
use crate::error::{EdgeError, EdgeResult};
use crate::foundation::{BoxedConnection, Connection, RestConnection};
use crate::framework::BoxedService;
use crate::gateway::{
    DEFAULT_PREDICATE_KEY, EnvelopeWriter, ExecuteArg, Gateway, GatewayDelegate, RestWriter,
    RpcWriter, dispatch_rest, dispatch_rpc,
};
use crate::routing::RouteTable;

/// Connection that records every write.
#[derive(Debug)]
pub struct TestConn {
    id: u64,
    client_ip: String,
    rest: Option<(String, String)>,
    kv: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<Vec<u8>>>,
    status: AtomicU16,
    closed: AtomicBool,
}

impl TestConn {
    fn new(id: u64, rest: Option<(String, String)>) -> Self {
        Self {
            id,
            client_ip: "127.0.0.1".to_string(),
            rest,
            kv: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            status: AtomicU16::new(200),
            closed: AtomicBool::new(false),
        }
    }

    /// A long-lived RPC connection.
    pub fn rpc(id: u64) -> Self {
        Self::new(id, None)
    }

    /// A single REST exchange.
    pub fn rest(id: u64, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(id, Some((method.into(), path.into())))
    }

    pub fn with_header(self, key: &str, value: &str) -> Self {
        self.kv.lock().insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    /// Every frame written so far.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn status(&self) -> u16 {
        self.status.load(Ordering::Relaxed)
    }

    /// Makes further writes fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Connection for TestConn {
    fn id(&self) -> u64 {
        self.id
    }

    fn client_ip(&self) -> String {
        self.client_ip.clone()
    }

    async fn write(&self, data: &[u8]) -> EdgeResult<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(EdgeError::WriteToClosedConn);
        }
        self.writes.lock().push(data.to_vec());
        Ok(data.len())
    }

    fn is_streaming(&self) -> bool {
        self.rest.is_none()
    }

    fn walk(&self, f: &mut dyn FnMut(&str, &str) -> bool) {
        for (k, v) in self.kv.lock().iter() {
            if !f(k, v) {
                break;
            }
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.kv.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.kv.lock().insert(key.to_string(), value.to_string());
    }

    fn as_rest(&self) -> Option<&dyn RestConnection> {
        self.rest.as_ref().map(|_| self as &dyn RestConnection)
    }
}

impl RestConnection for TestConn {
    fn method(&self) -> String {
        self.rest.as_ref().map(|(m, _)| m.clone()).unwrap_or_default()
    }

    fn path(&self) -> String {
        self.rest.as_ref().map(|(_, p)| p.clone()).unwrap_or_default()
    }

    fn set_status_code(&self, code: u16) {
        self.status.store(code, Ordering::Relaxed);
    }

    fn status_code(&self) -> u16 {
        self.status()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Rest,
    Rpc,
}

/// Gateway without a transport; tests push messages with [`TestGateway::send`].
pub struct TestGateway {
    name: String,
    mode: Mode,
    predicate_key: String,
    routes: RwLock<RouteTable>,
    delegate: RwLock<Option<Arc<dyn GatewayDelegate>>>,
    started: AtomicBool,
}

impl TestGateway {
    fn new(name: &str, mode: Mode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            predicate_key: DEFAULT_PREDICATE_KEY.to_string(),
            routes: RwLock::new(RouteTable::new()),
            delegate: RwLock::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn rest() -> Self {
        Self::new("test-rest", Mode::Rest)
    }

    pub fn rpc() -> Self {
        Self::new("test-rpc", Mode::Rpc)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Delivers one message on `conn`, as the transport would.
    pub async fn send(&self, conn: Arc<TestConn>, data: &[u8]) {
        let Some(delegate) = self.delegate.read().clone() else {
            return;
        };
        let writer: Arc<dyn EnvelopeWriter> = match self.mode {
            Mode::Rest => Arc::new(RestWriter),
            Mode::Rpc => Arc::new(RpcWriter),
        };
        let conn: BoxedConnection = conn;
        delegate.on_open(&conn);
        let id = conn.id();
        delegate.on_message(conn, writer, data).await;
        delegate.on_close(id);
    }
}

#[async_trait]
impl Gateway for TestGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> EdgeResult<()> {
        self.started.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn shutdown(&self) -> EdgeResult<()> {
        self.started.store(false, Ordering::Relaxed);
        self.delegate.write().take();
        Ok(())
    }

    fn register(&self, service: &BoxedService) -> EdgeResult<()> {
        self.routes.write().register(service.as_ref())
    }

    fn subscribe(&self, delegate: Arc<dyn GatewayDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    fn dispatch(&self, ctx: &mut Context, data: &[u8]) -> EdgeResult<ExecuteArg> {
        let routes = self.routes.read();
        if ctx.is_rest() {
            dispatch_rest(&routes, ctx, data)
        } else {
            dispatch_rpc(&routes, &self.predicate_key, ctx, data)
        }
    }
}

/// Error handler that keeps every reported error.
#[derive(Debug, Clone, Default)]
pub struct ErrorRecorder {
    errors: Arc<Mutex<Vec<EdgeError>>>,
}

impl ErrorRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> ErrHandler {
        let errors = Arc::clone(&self.errors);
        Arc::new(move |_ctx, err| errors.lock().push(err.clone()))
    }

    pub fn count(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn errors(&self) -> Vec<EdgeError> {
        self.errors.lock().clone()
    }
}
