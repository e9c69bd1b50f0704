//! Gateway-facing bridge.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{Instrument, debug_span, error, trace};

use super::{install_panic_hook, panic_error};
use crate::context::{ContextPool, ErrHandler};
use crate::error::EdgeError;
use crate::foundation::BoxedConnection;
use crate::framework::Registry;
use crate::gateway::{BoxedGateway, EnvelopeWriter, GatewayDelegate};

/// Turns gateway messages into executed handler chains.
///
/// For every inbound message the bridge acquires a context, lets the gateway
/// resolve the route, loads the contract's effective chain and runs it.
/// Resolution failures and handler panics are reported to the error handler;
/// a panic never escapes into the gateway.
pub struct NorthBridge {
    gateway: BoxedGateway,
    registry: Arc<Registry>,
    pool: Arc<ContextPool>,
    error_handler: ErrHandler,
}

impl NorthBridge {
    pub fn new(
        gateway: BoxedGateway,
        registry: Arc<Registry>,
        pool: Arc<ContextPool>,
        error_handler: ErrHandler,
    ) -> Self {
        install_panic_hook();
        Self {
            gateway,
            registry,
            pool,
            error_handler,
        }
    }

    async fn execute(&self, conn: BoxedConnection, writer: Arc<dyn EnvelopeWriter>, data: &[u8]) {
        let mut ctx = self.pool.acquire_owned();
        ctx.bind(conn, writer, Some(Arc::clone(&self.error_handler)));

        let arg = match self.gateway.dispatch(&mut ctx, data) {
            Ok(arg) => arg,
            Err(e) => {
                (self.error_handler)(Some(&*ctx), &e);
                return;
            }
        };
        let Some(entry) = self.registry.get(&arg.service_name, &arg.contract_id) else {
            let err = EdgeError::no_handler(&arg.route);
            (self.error_handler)(Some(&*ctx), &err);
            return;
        };
        ctx.prepare(&arg, entry);

        if let Err(payload) = AssertUnwindSafe(ctx.next()).catch_unwind().await {
            let err = panic_error(payload);
            if let EdgeError::Panic { message, backtrace } = &err {
                error!(
                    service = %arg.service_name,
                    route = %arg.route,
                    client_ip = %ctx.client_ip(),
                    panic = %message,
                    backtrace = %backtrace,
                    "Recovered from panic in handler chain"
                );
            }
            (self.error_handler)(Some(&*ctx), &err);
        }
    }
}

#[async_trait]
impl GatewayDelegate for NorthBridge {
    fn on_open(&self, conn: &BoxedConnection) {
        trace!(
            gateway = %self.gateway.name(),
            conn_id = conn.id(),
            client_ip = %conn.client_ip(),
            "Connection opened"
        );
    }

    async fn on_message(&self, conn: BoxedConnection, writer: Arc<dyn EnvelopeWriter>, data: &[u8]) {
        let span = debug_span!("dispatch", gateway = %self.gateway.name(), conn_id = conn.id());
        self.execute(conn, writer, data).instrument(span).await;
    }

    fn on_close(&self, conn_id: u64) {
        trace!(gateway = %self.gateway.name(), conn_id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::connection::Connection;
    use crate::bridge::default_error_handler;
    use crate::context::context_pool;
    use crate::foundation::Pool;
    use crate::framework::{ContractDesc, ServiceDesc, handler, sync_handler};
    use crate::gateway::Gateway;
    use crate::testkit::{ErrorRecorder, TestConn, TestGateway};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        n: u64,
    }

    fn echo_service() -> crate::framework::BoxedService {
        let echo = ContractDesc::new("echo")
            .rest("GET", "/echo/:n")
            .rpc("echo")
            .input::<Echo>()
            .handler(handler(|ctx| {
                Box::pin(async move {
                    let n = match ctx.in_msg::<Echo>() {
                        Some(req) => req.n,
                        None => ctx.path_param("n").and_then(|n| n.parse().ok()).unwrap_or(0),
                    };
                    let mut out = ctx.out();
                    out.set_msg(Echo { n });
                    ctx.send(out).await;
                })
            }))
            .build();
        let boom = ContractDesc::new("boom")
            .rest("POST", "/boom")
            .raw_input()
            .handler(handler(|ctx| {
                Box::pin(async move {
                    let mut out = ctx.out();
                    out.set_msg(json!({"partial": true}));
                    ctx.send(out).await;
                    panic!("handler exploded");
                })
            }))
            .build();
        let x_get = ContractDesc::new("x_get")
            .rest("GET", "/x")
            .raw_input()
            .handler(sync_handler(|_| {}))
            .build();
        let x_post = ContractDesc::new("x_post")
            .rest("POST", "/x")
            .raw_input()
            .handler(sync_handler(|_| {}))
            .build();
        ServiceDesc::new("demo")
            .contract(echo)
            .contract(boom)
            .contract(x_get)
            .contract(x_post)
            .build()
    }

    fn setup(gateway: Arc<TestGateway>, recorder: &ErrorRecorder) -> Arc<ContextPool> {
        let mut registry = Registry::new();
        let service = registry.register(echo_service()).unwrap();
        gateway.register(&service).unwrap();

        let pool = context_pool(8, Arc::new(Pool::with_default(8)));
        let bridge = NorthBridge::new(
            gateway.clone(),
            Arc::new(registry),
            Arc::clone(&pool),
            recorder.handler(),
        );
        gateway.subscribe(Arc::new(bridge));
        pool
    }

    #[tokio::test]
    async fn test_rest_echo_from_path() {
        let gateway = Arc::new(TestGateway::rest());
        let recorder = ErrorRecorder::new();
        setup(gateway.clone(), &recorder);

        let conn = Arc::new(TestConn::rest(1, "GET", "/echo/42"));
        gateway.send(conn.clone(), b"").await;

        assert_eq!(recorder.count(), 0);
        let body: serde_json::Value = serde_json::from_slice(&conn.writes()[0]).unwrap();
        assert_eq!(body, json!({"n": 42}));
        assert_eq!(conn.get("Content-Type").as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_rpc_echo_keeps_request_id() {
        let gateway = Arc::new(TestGateway::rpc());
        let recorder = ErrorRecorder::new();
        setup(gateway.clone(), &recorder);

        let conn = Arc::new(TestConn::rpc(7));
        let frame = json!({"id": "req-1", "hdr": {"cmd": "echo"}, "payload": {"n": 5}});
        gateway.send(conn.clone(), frame.to_string().as_bytes()).await;

        let reply: serde_json::Value = serde_json::from_slice(&conn.writes()[0]).unwrap();
        assert_eq!(reply["id"], "req-1");
        assert_eq!(reply["payload"], json!({"n": 5}));
    }

    #[tokio::test]
    async fn test_unmatched_route_reports_once() {
        let gateway = Arc::new(TestGateway::rest());
        let recorder = ErrorRecorder::new();
        let pool = setup(gateway.clone(), &recorder);

        // path is known, method is not
        let conn = Arc::new(TestConn::rest(1, "DELETE", "/x"));
        gateway.send(conn.clone(), b"").await;

        assert_eq!(recorder.count(), 1);
        assert!(matches!(recorder.errors()[0], EdgeError::NoHandler { .. }));
        assert!(conn.writes().is_empty());
        assert_eq!(pool.idle(), 1);

        for method in ["GET", "POST"] {
            gateway.send(Arc::new(TestConn::rest(2, method, "/x")), b"").await;
        }
        assert_eq!(recorder.count(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_recovered() {
        let gateway = Arc::new(TestGateway::rest());
        let recorder = ErrorRecorder::new();
        let pool = setup(gateway.clone(), &recorder);

        let conn = Arc::new(TestConn::rest(3, "POST", "/boom"));
        gateway.send(conn.clone(), b"").await;

        assert_eq!(conn.writes(), vec![br#"{"partial":true}"#.to_vec()]);
        assert_eq!(recorder.count(), 1);
        let EdgeError::Panic { message, backtrace } = &recorder.errors()[0] else {
            panic!("expected a panic error");
        };
        assert_eq!(message, "handler exploded");
        assert!(!backtrace.is_empty());
        assert_eq!(pool.idle(), 1);

        // the pooled context is clean and the bridge keeps serving
        let conn = Arc::new(TestConn::rest(4, "GET", "/echo/1"));
        gateway.send(conn.clone(), b"").await;
        assert_eq!(conn.writes(), vec![br#"{"n":1}"#.to_vec()]);
        assert_eq!(pool.created(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_are_isolated() {
        let gateway = Arc::new(TestGateway::rest());
        let recorder = ErrorRecorder::new();
        setup(gateway.clone(), &recorder);

        let mut tasks = Vec::new();
        for i in 0..64u64 {
            let gateway = gateway.clone();
            tasks.push(tokio::spawn(async move {
                let conn = Arc::new(TestConn::rest(i, "GET", &format!("/echo/{i}")));
                gateway.send(conn.clone(), b"").await;
                (i, conn.writes())
            }));
        }
        for task in tasks {
            let (i, writes) = task.await.unwrap();
            assert_eq!(writes, vec![format!(r#"{{"n":{i}}}"#).into_bytes()]);
        }
        assert_eq!(recorder.count(), 0);
    }

    #[tokio::test]
    async fn test_service_hooks_wrap_contract_handlers() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (pre, post, body) = (order.clone(), order.clone(), order.clone());
        let service = ServiceDesc::new("hooks")
            .pre(sync_handler(move |_| pre.lock().push("pre")))
            .post(sync_handler(move |_| post.lock().push("post")))
            .contract(
                ContractDesc::new("only")
                    .rest("GET", "/only")
                    .handler(sync_handler(move |_| body.lock().push("contract")))
                    .build(),
            )
            .build();

        let gateway = Arc::new(TestGateway::rest());
        let mut registry = Registry::new();
        let service = registry.register(service).unwrap();
        gateway.register(&service).unwrap();
        let pool = context_pool(2, Arc::new(Pool::with_default(2)));
        gateway.subscribe(Arc::new(NorthBridge::new(
            gateway.clone(),
            Arc::new(registry),
            pool,
            default_error_handler(),
        )));

        gateway.send(Arc::new(TestConn::rest(1, "GET", "/only")), b"").await;
        assert_eq!(*order.lock(), vec!["pre", "contract", "post"]);
    }
}
