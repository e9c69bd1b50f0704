//! Cluster-facing bridge.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, debug_span, error, info, warn};

use super::{install_panic_hook, panic_error};
use crate::cluster::ClusterDelegate;
use crate::context::{ContextPool, ErrHandler};
use crate::error::{EdgeError, EdgeResult};
use crate::forward::{CarrierData, CarrierKind, CarrierWriter, ClusterConn, EnvelopeCarrier, Forwarder, ReplyPath};
use crate::framework::{EdgeSelector, Registry};
use crate::gateway::ExecuteArg;

struct Inner {
    registry: Arc<Registry>,
    pool: Arc<ContextPool>,
    forwarder: Arc<Forwarder>,
    error_handler: ErrHandler,
    tasks: TaskTracker,
}

/// Executes requests forwarded by peers and routes replies to waiting
/// sessions.
#[derive(Clone)]
pub struct SouthBridge {
    inner: Arc<Inner>,
}

impl SouthBridge {
    pub fn new(
        registry: Arc<Registry>,
        pool: Arc<ContextPool>,
        forwarder: Arc<Forwarder>,
        error_handler: ErrHandler,
    ) -> Self {
        install_panic_hook();
        Self {
            inner: Arc::new(Inner {
                registry,
                pool,
                forwarder,
                error_handler,
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Number of forwarded requests still executing.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Waits until every forwarded request accepted so far has sent its eof.
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    fn report(&self, err: &EdgeError) {
        (self.inner.error_handler)(None, err);
    }

    async fn execute(&self, carrier: EnvelopeCarrier) {
        let reply = Arc::new(ReplyPath::new(
            Arc::clone(self.inner.forwarder.cluster()),
            &carrier.session_id,
            &carrier.origin_id,
        ));
        let data = carrier.data.unwrap_or_default();

        if let Err(err) = self.resume(&reply, data).await {
            self.report(&err);
            if let Err(e) = reply.reply_error(&err).await {
                self.report(&e);
            }
        }
        if let Err(e) = reply.eof().await {
            self.report(&e);
        }
    }

    /// Replays the request and runs the chain after the forwarding step.
    ///
    /// Errors are returned only when nothing has executed yet.
    async fn resume(&self, reply: &Arc<ReplyPath>, data: CarrierData) -> EdgeResult<()> {
        let inner = &self.inner;
        let Some(entry) = inner.registry.get(&data.svc, &data.cid) else {
            return Err(EdgeError::no_handler(format!("{}/{}", data.svc, data.cid)));
        };
        let msg = entry.contract().input().decode(&data.body())?;

        let mut ctx = inner.pool.acquire_owned();
        ctx.bind(
            Arc::new(ClusterConn::new(&data, Arc::clone(reply))),
            Arc::new(CarrierWriter::new(Arc::clone(reply))),
            Some(Arc::clone(&inner.error_handler)),
        );
        ctx.set_forwarded(true);
        ctx.input_mut()
            .set_id(data.envelope_id)
            .set_hdr_map(data.hdr)
            .set_boxed_msg(msg);
        let arg = ExecuteArg {
            service_name: data.svc,
            contract_id: data.cid,
            route: data.route,
        };
        ctx.prepare(&arg, entry);

        if let Some(selector) = entry.contract().edge_selector() {
            let selected = selector
                .select(&ctx.limited())
                .await
                .map_err(|e| EdgeError::Selector(e.to_string()))?;
            if let Some(target) = selected
                && target.server_id() != inner.forwarder.me().server_id()
            {
                return Err(EdgeError::MultiHop {
                    contract: arg.contract_id,
                    target: target.server_id().to_string(),
                });
            }
        }

        ctx.skip_to(data.idx);
        if let Err(payload) = AssertUnwindSafe(ctx.next()).catch_unwind().await {
            let err = panic_error(payload);
            if let EdgeError::Panic { message, backtrace } = &err {
                error!(
                    service = %arg.service_name,
                    route = %arg.route,
                    origin = %reply.origin_id(),
                    panic = %message,
                    backtrace = %backtrace,
                    "Recovered from panic in forwarded chain"
                );
            }
            (inner.error_handler)(Some(&*ctx), &err);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterDelegate for SouthBridge {
    async fn on_message(&self, data: Vec<u8>) {
        let carrier = match EnvelopeCarrier::from_bytes(&data) {
            Ok(carrier) => carrier,
            Err(e) => {
                self.report(&e);
                return;
            }
        };

        match carrier.kind {
            CarrierKind::Outgoing => {
                let span = debug_span!(
                    "forwarded",
                    session = %carrier.session_id,
                    origin = %carrier.origin_id
                );
                let this = self.clone();
                self.inner
                    .tasks
                    .spawn(async move { this.execute(carrier).await }.instrument(span));
            }
            CarrierKind::Incoming | CarrierKind::Eof => {
                let session = carrier.session_id.clone();
                if !self.inner.forwarder.deliver(carrier) {
                    debug!(session = %session, "Dropping reply for unknown session");
                }
            }
        }
    }

    fn on_join(&self, members: &[String]) {
        info!(?members, "Cluster members joined");
    }

    fn on_leave(&self, members: &[String]) {
        warn!(?members, "Cluster members left");
    }

    fn on_error(&self, err: &EdgeError) {
        self.report(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::NorthBridge;
    use crate::cluster::{
        Backplane, Cluster, ClusterMember, ClusterStore, MemoryBackplane, MemoryStore,
        StoreCluster, StoreClusterConfig,
    };
    use crate::context::context_pool;
    use crate::forward::ForwardWrapper;
    use crate::foundation::{Connection, Pool};
    use crate::framework::{BoxedService, ContractDesc, ServiceDesc, handler, selector_fn};
    use crate::gateway::Gateway;
    use crate::testkit::{ErrorRecorder, TestConn, TestGateway};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        n: u64,
    }

    struct Node {
        gateway: Arc<TestGateway>,
        cluster: Arc<StoreCluster>,
        forwarder: Arc<Forwarder>,
        recorder: ErrorRecorder,
    }

    /// `route_to` picks the member that must run `echo`.
    fn service(route_to: &'static str, executed_on: &'static str) -> BoxedService {
        let echo = ContractDesc::new("echo")
            .rest("GET", "/echo/:n")
            .input::<Echo>()
            .selector(selector_fn(move |_| Ok(Some(ClusterMember::new(route_to, vec![])))))
            .handler(handler(move |ctx| {
                Box::pin(async move {
                    let n: u64 = ctx.path_param("n").and_then(|n| n.parse().ok()).unwrap_or(0);
                    if let Some(conn) = ctx.conn() {
                        conn.set("Set-Cookie", &format!("sid={executed_on}"));
                    }
                    ctx.set_status_code(201);
                    let mut out = ctx.out();
                    out.set_hdr("X-Executed-On", executed_on).set_msg(Echo { n });
                    ctx.send(out).await;
                    let mut out = ctx.out();
                    out.set_msg(json!({"done": ctx.is_forwarded()}));
                    ctx.send(out).await;
                })
            }))
            .build();
        ServiceDesc::new("demo").contract(echo).build()
    }

    async fn node(
        id: &'static str,
        route_to: &'static str,
        store: Arc<dyn ClusterStore>,
        bus: Arc<dyn Backplane>,
    ) -> Node {
        let cluster = Arc::new(StoreCluster::new(
            ClusterMember::new(id, vec![]),
            store,
            bus,
            StoreClusterConfig::default(),
        ));
        let forwarder = Arc::new(Forwarder::new(cluster.clone(), Duration::from_secs(2)));
        let recorder = ErrorRecorder::new();

        let mut registry = Registry::new().with_wrapper(Arc::new(ForwardWrapper::new(forwarder.clone())));
        let service = registry.register(service(route_to, id)).unwrap();
        let registry = Arc::new(registry);
        let pool = context_pool(8, Arc::new(Pool::with_default(8)));

        let gateway = Arc::new(TestGateway::rest());
        gateway.register(&service).unwrap();
        gateway.subscribe(Arc::new(NorthBridge::new(
            gateway.clone(),
            registry.clone(),
            pool.clone(),
            recorder.handler(),
        )));
        cluster.subscribe(Arc::new(SouthBridge::new(
            registry,
            pool,
            forwarder.clone(),
            recorder.handler(),
        )));
        cluster.start().await.unwrap();

        Node {
            gateway,
            cluster,
            forwarder,
            recorder,
        }
    }

    fn shared() -> (Arc<dyn ClusterStore>, Arc<dyn Backplane>) {
        (Arc::new(MemoryStore::new()), Arc::new(MemoryBackplane::default()))
    }

    #[tokio::test]
    async fn test_forwarded_response_matches_direct() {
        let (store, bus) = shared();
        let a = node("a", "b", store.clone(), bus.clone()).await;
        let b = node("b", "b", store, bus).await;

        let via_a = Arc::new(TestConn::rest(1, "GET", "/echo/42"));
        a.gateway.send(via_a.clone(), b"").await;

        let direct = Arc::new(TestConn::rest(2, "GET", "/echo/42"));
        b.gateway.send(direct.clone(), b"").await;

        assert_eq!(via_a.writes()[0], br#"{"n":42}"#.to_vec());
        assert_eq!(via_a.writes()[1], br#"{"done":true}"#.to_vec());
        assert_eq!(direct.writes()[1], br#"{"done":false}"#.to_vec());
        assert_eq!(via_a.status(), 201);
        assert_eq!(via_a.get("X-Executed-On").as_deref(), Some("b"));
        assert_eq!(direct.get("X-Executed-On").as_deref(), Some("b"));

        assert_eq!(a.recorder.count(), 0);
        assert_eq!(b.recorder.count(), 0);
        assert_eq!(a.forwarder.pending(), 0);

        a.cluster.shutdown().await.unwrap();
        b.cluster.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_values_reach_caller() {
        let (store, bus) = shared();
        let a = node("a", "b", store.clone(), bus.clone()).await;
        let b = node("b", "b", store, bus).await;

        let via_a = Arc::new(TestConn::rest(1, "GET", "/echo/1").with_header("X-Request-Tag", "t1"));
        a.gateway.send(via_a.clone(), b"").await;

        let direct = Arc::new(TestConn::rest(2, "GET", "/echo/1"));
        b.gateway.send(direct.clone(), b"").await;

        assert_eq!(direct.get("Set-Cookie").as_deref(), Some("sid=b"));
        assert_eq!(via_a.get("Set-Cookie"), direct.get("Set-Cookie"));
        assert_eq!(via_a.get("X-Request-Tag").as_deref(), Some("t1"));
        assert_eq!(via_a.writes().len(), direct.writes().len());

        a.cluster.shutdown().await.unwrap();
        b.cluster.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_hop_is_refused() {
        let (store, bus) = shared();
        // a routes to b, b would route to c
        let a = node("a", "b", store.clone(), bus.clone()).await;
        let b = node("b", "c", store, bus).await;

        let conn = Arc::new(TestConn::rest(1, "GET", "/echo/7"));
        a.gateway.send(conn.clone(), b"").await;

        assert_eq!(conn.status(), 502);
        let body: serde_json::Value = serde_json::from_slice(&conn.writes()[0]).unwrap();
        assert_eq!(body["code"], 502);
        assert_eq!(b.recorder.count(), 1);
        assert!(matches!(b.recorder.errors()[0], EdgeError::MultiHop { .. }));
        assert_eq!(a.recorder.count(), 0);

        a.cluster.shutdown().await.unwrap();
        b.cluster.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_contract_answers_not_found() {
        let (store, bus) = shared();
        let b = node("b", "b", store, bus.clone()).await;
        let mut inbox = bus.subscribe("a").await.unwrap();

        let data = CarrierData {
            svc: "demo".into(),
            cid: "missing".into(),
            ..Default::default()
        };
        let carrier = EnvelopeCarrier {
            session_id: "s1".into(),
            kind: CarrierKind::Outgoing,
            origin_id: "a".into(),
            target_id: "b".into(),
            data: Some(data),
        };
        bus.publish("b", carrier.to_bytes().unwrap()).await.unwrap();

        let first = EnvelopeCarrier::from_bytes(&inbox.recv().await.unwrap()).unwrap();
        assert_eq!(first.kind, CarrierKind::Incoming);
        assert_eq!(first.session_id, "s1");
        let body: serde_json::Value = serde_json::from_slice(&first.data.unwrap().body()).unwrap();
        assert_eq!(body["code"], 404);
        let last = EnvelopeCarrier::from_bytes(&inbox.recv().await.unwrap()).unwrap();
        assert_eq!(last.kind, CarrierKind::Eof);
        assert_eq!(b.recorder.count(), 1);

        b.cluster.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_waits_for_forwarded_requests() {
        let bus: Arc<dyn Backplane> = Arc::new(MemoryBackplane::default());
        let mut inbox = bus.subscribe("a").await.unwrap();
        let cluster = Arc::new(StoreCluster::new(
            ClusterMember::new("b", vec![]),
            Arc::new(MemoryStore::new()),
            bus,
            StoreClusterConfig::default(),
        ));
        let recorder = ErrorRecorder::new();
        let bridge = SouthBridge::new(
            Arc::new(Registry::new()),
            context_pool(1, Arc::new(Pool::with_default(1))),
            Arc::new(Forwarder::new(cluster, Duration::from_secs(1))),
            recorder.handler(),
        );

        for session in ["s1", "s2"] {
            let carrier = EnvelopeCarrier {
                session_id: session.into(),
                kind: CarrierKind::Outgoing,
                origin_id: "a".into(),
                target_id: "b".into(),
                data: Some(CarrierData::default()),
            };
            bridge.on_message(carrier.to_bytes().unwrap()).await;
        }
        bridge.drain().await;

        assert_eq!(bridge.in_flight(), 0);
        assert_eq!(recorder.count(), 2);
        let mut eofs = 0;
        while let Ok(frame) = inbox.try_recv() {
            if EnvelopeCarrier::from_bytes(&frame).unwrap().kind == CarrierKind::Eof {
                eofs += 1;
            }
        }
        assert_eq!(eofs, 2);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_reported() {
        let registry = Arc::new(Registry::new());
        let pool = context_pool(1, Arc::new(Pool::with_default(1)));
        let cluster = Arc::new(StoreCluster::new(
            ClusterMember::new("a", vec![]),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBackplane::default()),
            StoreClusterConfig::default(),
        ));
        let recorder = ErrorRecorder::new();
        let bridge = SouthBridge::new(
            registry,
            pool,
            Arc::new(Forwarder::new(cluster, Duration::from_secs(1))),
            recorder.handler(),
        );
        bridge.on_message(b"not a carrier".to_vec()).await;
        assert_eq!(recorder.count(), 1);

        // replies for unknown sessions are dropped silently
        let eof = EnvelopeCarrier::eof("nobody", "b", "a");
        bridge.on_message(eof.to_bytes().unwrap()).await;
        assert_eq!(recorder.count(), 1);
    }
}
