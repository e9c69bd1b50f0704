//! The edge server: gateways, services and the cluster wired together.

use std::future::Future;
use std::sync::Arc;

use edgewire_core::{
    Backplane, BoxedCluster, BoxedGateway, BoxedService, Cluster, ClusterMember, ClusterStore,
    EdgeError, ErrHandler, ForwardWrapper, Forwarder, MemoryBackplane, MemoryStore, NorthBridge,
    Pool, Registry, RouteInfo, SouthBridge, StoreCluster, context_pool, default_error_handler,
};
use futures::future::join_all;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoader, EdgeConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

enum ClusterSource {
    None,
    Ready(BoxedCluster),
    Store {
        store: Arc<dyn ClusterStore>,
        backplane: Arc<dyn Backplane>,
    },
    Local,
}

struct Running {
    registry: Arc<Registry>,
    south: Option<SouthBridge>,
}

enum State {
    Idle,
    Running(Running),
    Stopped,
}

/// An edge server instance.
///
/// ```rust,ignore
/// use edgewire_runtime::EdgeServer;
///
/// let server = EdgeServer::builder()
///     .gateway(http_gateway)
///     .service(orders_service)
///     .cluster_store(redis_store, redis_backplane)
///     .build()?;
///
/// server.run().await?;
/// ```
///
/// The server can be started once. [`EdgeServer::shutdown`] stops the
/// gateways first, then leaves the cluster.
pub struct EdgeServer {
    config: EdgeConfig,
    me: ClusterMember,
    gateways: Vec<BoxedGateway>,
    services: Vec<BoxedService>,
    cluster: Option<BoxedCluster>,
    error_handler: ErrHandler,
    state: Mutex<State>,
}

impl EdgeServer {
    pub fn builder() -> EdgeServerBuilder {
        EdgeServerBuilder::new()
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Identity of this instance in the cluster.
    pub fn me(&self) -> &ClusterMember {
        &self.me
    }

    pub fn cluster(&self) -> Option<&BoxedCluster> {
        self.cluster.as_ref()
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, State::Running(_))
    }

    /// Registered routes; empty unless running.
    pub async fn routes(&self) -> Vec<RouteInfo> {
        match &*self.state.lock().await {
            State::Running(running) => running.registry.routes().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Registers every service, joins the cluster and starts the gateways.
    ///
    /// Registration errors are returned before anything is started. A
    /// contract with an edge selector requires a cluster.
    pub async fn start(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        match *state {
            State::Idle => {}
            State::Running(_) => return Err(RuntimeError::AlreadyRunning),
            State::Stopped => return Err(RuntimeError::Stopped),
        }

        let forwarder = self.cluster.as_ref().map(|cluster| {
            Arc::new(Forwarder::new(
                Arc::clone(cluster),
                self.config.server.forward_timeout(),
            ))
        });
        let registry = Arc::new(self.build_registry(forwarder.as_ref())?);

        let max_idle = self.config.server.pool_max_idle;
        let pool = context_pool(max_idle, Arc::new(Pool::with_default(max_idle)));

        for gateway in &self.gateways {
            for service in registry.services() {
                gateway.register(service)?;
            }
            gateway.subscribe(Arc::new(NorthBridge::new(
                Arc::clone(gateway),
                Arc::clone(&registry),
                Arc::clone(&pool),
                Arc::clone(&self.error_handler),
            )));
        }

        let mut south = None;
        if let (Some(cluster), Some(forwarder)) = (&self.cluster, forwarder) {
            let bridge = SouthBridge::new(
                Arc::clone(&registry),
                Arc::clone(&pool),
                forwarder,
                Arc::clone(&self.error_handler),
            );
            cluster.subscribe(Arc::new(bridge.clone()));
            cluster.start().await?;
            info!(server_id = %self.me, "Joined cluster");
            south = Some(bridge);
        }

        if let Err(e) = self.start_gateways().await {
            if let Some(cluster) = &self.cluster
                && let Err(err) = cluster.shutdown().await
            {
                warn!(error = %err, "Failed to leave cluster after start failure");
            }
            return Err(e);
        }

        for route in registry.routes() {
            info!(
                service = %route.service,
                contract = %route.contract,
                routes = ?route.selectors,
                forwarded = route.forwarded,
                "Route registered"
            );
        }
        info!(
            server_id = %self.me,
            gateways = self.gateways.len(),
            contracts = registry.len(),
            "Edge server started"
        );

        *state = State::Running(Running { registry, south });
        Ok(())
    }

    fn build_registry(&self, forwarder: Option<&Arc<Forwarder>>) -> RuntimeResult<Registry> {
        let mut registry = Registry::new();
        match forwarder {
            Some(forwarder) => {
                registry.add_wrapper(Arc::new(ForwardWrapper::new(Arc::clone(forwarder))));
            }
            None => {
                let forwarding = self.services.iter().find(|svc| {
                    svc.contracts()
                        .iter()
                        .any(|contract| contract.edge_selector().is_some())
                });
                if let Some(service) = forwarding {
                    warn!(service = %service.name(), "Edge selector declared without a cluster");
                    return Err(EdgeError::ClusterNotSet.into());
                }
            }
        }

        for service in &self.services {
            registry.register(Arc::clone(service))?;
        }
        Ok(registry)
    }

    async fn start_gateways(&self) -> RuntimeResult<()> {
        for (i, gateway) in self.gateways.iter().enumerate() {
            if let Err(e) = gateway.start().await {
                warn!(gateway = %gateway.name(), error = %e, "Gateway failed to start");
                for started in &self.gateways[..i] {
                    if let Err(err) = started.shutdown().await {
                        warn!(
                            gateway = %started.name(),
                            error = %err,
                            "Failed to stop gateway after start failure"
                        );
                    }
                }
                return Err(e.into());
            }
            debug!(gateway = %gateway.name(), "Gateway started");
        }
        Ok(())
    }

    /// Stops the gateways, waits for forwarded requests still executing here,
    /// then leaves the cluster, all within `shutdown_timeout_ms`.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        let running = match std::mem::replace(&mut *state, State::Stopped) {
            State::Running(running) => running,
            other => {
                *state = other;
                return Err(RuntimeError::NotRunning);
            }
        };

        let timeout = self.config.server.shutdown_timeout();
        let stop = async {
            let results = join_all(self.gateways.iter().map(|gateway| gateway.shutdown())).await;
            for (gateway, result) in self.gateways.iter().zip(results) {
                match result {
                    Ok(()) => debug!(gateway = %gateway.name(), "Gateway stopped"),
                    Err(e) => warn!(gateway = %gateway.name(), error = %e, "Gateway shutdown failed"),
                }
            }
            if let Some(south) = &running.south {
                south.drain().await;
                debug!("Forwarded requests drained");
            }
            if let Some(cluster) = &self.cluster
                && let Err(e) = cluster.shutdown().await
            {
                warn!(error = %e, "Cluster shutdown failed");
            }
        };

        tokio::time::timeout(timeout, stop)
            .await
            .map_err(|_| RuntimeError::ShutdownTimeout(timeout))?;
        info!(server_id = %self.me, "Edge server stopped");
        Ok(())
    }

    /// Starts, waits for Ctrl+C or SIGTERM, then shuts down.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;
        let signal = shutdown_signal().await;
        let stopped = self.shutdown().await;
        signal.and(stopped)
    }

    /// Starts, waits for `trigger`, then shuts down.
    pub async fn run_until<F>(&self, trigger: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        trigger.await;
        info!("Shutdown requested");
        self.shutdown().await
    }
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() -> RuntimeResult<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .map_err(|e| RuntimeError::Signal(e.to_string()))
    };

    #[cfg(unix)]
    let terminate = async {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(|e| RuntimeError::Signal(e.to_string()))?;
        term.recv().await;
        Ok::<(), RuntimeError>(())
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<RuntimeResult<()>>();

    tokio::select! {
        result = ctrl_c => {
            info!("Received Ctrl+C");
            result
        }
        result = terminate => {
            info!("Received SIGTERM");
            result
        }
    }
}

/// Builder for [`EdgeServer`].
pub struct EdgeServerBuilder {
    config: Option<EdgeConfig>,
    loader: Option<ConfigLoader>,
    gateways: Vec<BoxedGateway>,
    services: Vec<BoxedService>,
    cluster: ClusterSource,
    error_handler: Option<ErrHandler>,
    init_logging: bool,
}

impl Default for EdgeServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            loader: None,
            gateways: Vec::new(),
            services: Vec::new(),
            cluster: ClusterSource::None,
            error_handler: None,
            init_logging: true,
        }
    }

    /// Uses `config` as is; no files or environment are read.
    pub fn config(mut self, config: EdgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loads the configuration with `loader` at build time.
    pub fn config_loader(mut self, loader: ConfigLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn gateway(mut self, gateway: BoxedGateway) -> Self {
        self.gateways.push(gateway);
        self
    }

    pub fn service(mut self, service: BoxedService) -> Self {
        self.services.push(service);
        self
    }

    /// Joins an existing cluster. Its member identity overrides `server.id`.
    pub fn cluster(mut self, cluster: BoxedCluster) -> Self {
        self.cluster = ClusterSource::Ready(cluster);
        self
    }

    /// Builds a [`StoreCluster`] over `store` and `backplane` using the
    /// `cluster` config section.
    pub fn cluster_store(
        mut self,
        store: Arc<dyn ClusterStore>,
        backplane: Arc<dyn Backplane>,
    ) -> Self {
        self.cluster = ClusterSource::Store { store, backplane };
        self
    }

    /// A single-member cluster backed by in-process storage.
    pub fn local_cluster(mut self) -> Self {
        self.cluster = ClusterSource::Local;
        self
    }

    pub fn error_handler(mut self, handler: ErrHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Whether `build` installs the global log subscriber (default: true).
    pub fn init_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    pub fn build(self) -> RuntimeResult<EdgeServer> {
        let config = match (self.config, self.loader) {
            (Some(config), _) => {
                validate_config(&config)?;
                config
            }
            (None, Some(loader)) => loader.load()?,
            (None, None) => ConfigLoader::new().load()?,
        };

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let member = config.server.to_member();
        let cluster: Option<BoxedCluster> = match self.cluster {
            ClusterSource::None => None,
            ClusterSource::Ready(cluster) => Some(cluster),
            ClusterSource::Store { store, backplane } => Some(Arc::new(StoreCluster::new(
                member.clone(),
                store,
                backplane,
                config.cluster.to_store_config(),
            ))),
            ClusterSource::Local => Some(Arc::new(StoreCluster::new(
                member.clone(),
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryBackplane::new(config.cluster.inbox_capacity)),
                config.cluster.to_store_config(),
            ))),
        };
        let me = cluster
            .as_ref()
            .map(|cluster| cluster.me().clone())
            .unwrap_or(member);

        debug!(
            server_id = %me,
            gateways = self.gateways.len(),
            services = self.services.len(),
            clustered = cluster.is_some(),
            "Edge server built"
        );

        Ok(EdgeServer {
            config,
            me,
            gateways: self.gateways,
            services: self.services,
            cluster,
            error_handler: self.error_handler.unwrap_or_else(default_error_handler),
            state: Mutex::new(State::Idle),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgewire_core::testkit::{ErrorRecorder, TestConn, TestGateway};
    use edgewire_core::{ContractDesc, ServiceDesc, handler, selector_fn};
    use serde_json::json;
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    /// `echo` runs on `route_to`; `None` keeps it local.
    fn echo_service(route_to: Option<&'static str>) -> BoxedService {
        let mut echo = ContractDesc::new("echo").rest("GET", "/echo/:n");
        if let Some(target) = route_to {
            echo = echo.selector(selector_fn(move |_| {
                Ok(Some(ClusterMember::new(target, vec![])))
            }));
        }
        let echo = echo
            .handler(handler(|ctx| {
                Box::pin(async move {
                    let n: u64 = ctx.path_param("n").and_then(|n| n.parse().ok()).unwrap_or(0);
                    ctx.set_status_code(202);
                    let mut out = ctx.out();
                    out.set_msg(json!({"n": n, "forwarded": ctx.is_forwarded()}));
                    ctx.send(out).await;
                })
            }))
            .build();
        ServiceDesc::new("demo").contract(echo).build()
    }

    fn config(id: &str) -> EdgeConfig {
        let mut config = EdgeConfig::default();
        config.server.id = Some(id.to_string());
        config.server.shutdown_timeout_ms = 2000;
        config
    }

    #[tokio::test]
    async fn test_two_instances_forward_round_trip() {
        let store: Arc<dyn ClusterStore> = Arc::new(MemoryStore::new());
        let backplane: Arc<dyn Backplane> = Arc::new(MemoryBackplane::default());

        let gateway_a = Arc::new(TestGateway::rest());
        let recorder_a = ErrorRecorder::new();
        let a = EdgeServer::builder()
            .config(config("a"))
            .init_logging(false)
            .gateway(gateway_a.clone())
            .service(echo_service(Some("b")))
            .cluster_store(store.clone(), backplane.clone())
            .error_handler(recorder_a.handler())
            .build()
            .unwrap();

        let gateway_b = Arc::new(TestGateway::rest());
        let recorder_b = ErrorRecorder::new();
        let b = EdgeServer::builder()
            .config(config("b"))
            .init_logging(false)
            .gateway(gateway_b.clone())
            .service(echo_service(Some("b")))
            .cluster_store(store, backplane)
            .error_handler(recorder_b.handler())
            .build()
            .unwrap();

        assert_ok!(a.start().await);
        assert_ok!(b.start().await);
        assert!(gateway_a.is_started() && gateway_b.is_started());

        let via_a = Arc::new(TestConn::rest(1, "GET", "/echo/9"));
        gateway_a.send(via_a.clone(), b"").await;
        let direct = Arc::new(TestConn::rest(2, "GET", "/echo/9"));
        gateway_b.send(direct.clone(), b"").await;

        let forwarded: serde_json::Value = serde_json::from_slice(&via_a.writes()[0]).unwrap();
        let local: serde_json::Value = serde_json::from_slice(&direct.writes()[0]).unwrap();
        assert_eq!(forwarded, json!({"n": 9, "forwarded": true}));
        assert_eq!(local, json!({"n": 9, "forwarded": false}));
        assert_eq!(via_a.status(), direct.status());
        assert_eq!(via_a.status(), 202);
        assert_eq!(recorder_a.count() + recorder_b.count(), 0);

        assert_ok!(a.shutdown().await);
        assert_ok!(b.shutdown().await);
        assert!(!gateway_a.is_started());
    }

    #[tokio::test]
    async fn test_selector_without_cluster() {
        let gateway = Arc::new(TestGateway::rest());
        let server = EdgeServer::builder()
            .config(config("solo"))
            .init_logging(false)
            .gateway(gateway.clone())
            .service(echo_service(Some("elsewhere")))
            .build()
            .unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Edge(EdgeError::ClusterNotSet)));
        assert!(!gateway.is_started());
        assert_eq!(gateway.route_count(), 0);
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn test_duplicate_service_is_rejected_before_start() {
        let gateway = Arc::new(TestGateway::rest());
        let server = EdgeServer::builder()
            .config(config("solo"))
            .init_logging(false)
            .gateway(gateway.clone())
            .service(echo_service(None))
            .service(echo_service(None))
            .build()
            .unwrap();

        let err = assert_err!(server.start().await);
        assert!(matches!(err, RuntimeError::Edge(EdgeError::DuplicateService(_))));
        assert!(!gateway.is_started());
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let gateway = Arc::new(TestGateway::rpc());
        let server = EdgeServer::builder()
            .config(config("solo"))
            .init_logging(false)
            .gateway(gateway.clone())
            .service(echo_service(None))
            .build()
            .unwrap();

        assert!(matches!(server.shutdown().await, Err(RuntimeError::NotRunning)));
        assert_ok!(server.start().await);
        assert!(matches!(server.start().await, Err(RuntimeError::AlreadyRunning)));

        let routes = server.routes().await;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].contract, "echo");
        assert!(!routes[0].forwarded);

        assert_ok!(server.shutdown().await);
        assert!(server.routes().await.is_empty());
        assert!(matches!(server.start().await, Err(RuntimeError::Stopped)));
    }

    #[tokio::test]
    async fn test_local_cluster_executes_in_place() {
        let gateway = Arc::new(TestGateway::rest());
        let server = EdgeServer::builder()
            .config(config("only"))
            .init_logging(false)
            .gateway(gateway.clone())
            .service(echo_service(Some("only")))
            .local_cluster()
            .build()
            .unwrap();
        assert_eq!(server.me().server_id(), "only");

        assert_ok!(server.start().await);
        assert!(server.routes().await[0].forwarded);

        let conn = Arc::new(TestConn::rest(1, "GET", "/echo/3"));
        gateway.send(conn.clone(), b"").await;
        let body: serde_json::Value = serde_json::from_slice(&conn.writes()[0]).unwrap();
        assert_eq!(body, json!({"n": 3, "forwarded": false}));

        let members = server.cluster().unwrap().members().await.unwrap();
        assert_eq!(members, vec![server.me().clone()]);
        assert_ok!(server.shutdown().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_until_trigger() {
        let gateway = Arc::new(TestGateway::rest());
        let server = Arc::new(
            EdgeServer::builder()
                .config(config("solo"))
                .init_logging(false)
                .gateway(gateway.clone())
                .service(echo_service(None))
                .build()
                .unwrap(),
        );

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                server
                    .run_until(async {
                        let _ = rx.await;
                    })
                    .await
            }
        });

        while !server.is_running().await {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(gateway.is_started());

        tx.send(()).unwrap();
        assert_ok!(task.await.unwrap());
        assert!(!gateway.is_started());
        assert!(!server.is_running().await);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut bad = config("x");
        bad.cluster.heartbeat_ms = 0;
        let result = EdgeServer::builder().config(bad).init_logging(false).build();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }
}
