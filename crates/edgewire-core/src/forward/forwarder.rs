//! Origin side of cross-instance forwarding.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::carrier::{CarrierKind, EnvelopeCarrier, STATUS_CODE_HDR};
use crate::cluster::{BoxedCluster, Cluster, ClusterMember};
use crate::context::Context;
use crate::error::{EdgeError, EdgeResult};
use crate::foundation::{ErrorMessage, RawMessage};
use crate::framework::{
    BoxFuture, BoxedContract, ContractWrap, ContractWrapper, EdgeSelector, Handler,
};

/// Default deadline of one forwarded round trip.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks in-flight forwarding sessions of this instance.
pub struct Forwarder {
    cluster: BoxedCluster,
    sessions: Mutex<HashMap<String, mpsc::UnboundedSender<EnvelopeCarrier>>>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(cluster: BoxedCluster, timeout: Duration) -> Self {
        Self {
            cluster,
            sessions: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn cluster(&self) -> &BoxedCluster {
        &self.cluster
    }

    pub fn me(&self) -> &ClusterMember {
        self.cluster.me()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of sessions waiting for replies.
    pub fn pending(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Hands a reply carrier to its session. Returns false when no session
    /// with that id is waiting (it may have timed out already).
    pub fn deliver(&self, carrier: EnvelopeCarrier) -> bool {
        let tx = self.sessions.lock().get(&carrier.session_id).cloned();
        match tx {
            Some(tx) => tx.send(carrier).is_ok(),
            None => false,
        }
    }

    /// Ships the request bound to `ctx` to `target` and relays every reply
    /// onto the caller's connection until the target signals the end.
    pub async fn forward(&self, ctx: &Context, target: &ClusterMember) -> EdgeResult<()> {
        let session_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _session = Session::open(self, &session_id, tx);

        let carrier =
            EnvelopeCarrier::outgoing(&session_id, self.me().server_id(), target.server_id(), ctx)?;
        debug!(
            session = %session_id,
            target = %target,
            idx = ctx.cursor(),
            "Forwarding request"
        );
        self.cluster
            .publish(target.server_id(), carrier.to_bytes()?)
            .await
            .map_err(|e| EdgeError::forward(target.server_id(), e))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let carrier = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(carrier)) => carrier,
                Ok(None) => return Err(EdgeError::forward(target.server_id(), "session closed")),
                Err(_) => {
                    return Err(EdgeError::ForwardTimeout {
                        target: target.server_id().to_string(),
                        timeout: self.timeout,
                    });
                }
            };
            match carrier.kind {
                CarrierKind::Incoming => relay(ctx, carrier).await,
                CarrierKind::Eof => return Ok(()),
                CarrierKind::Outgoing => {
                    warn!(session = %session_id, "Ignoring outgoing carrier on a reply session");
                }
            }
        }
    }
}

impl fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forwarder")
            .field("me", self.me())
            .field("timeout", &self.timeout)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Removes the session entry on every exit path.
struct Session<'a> {
    forwarder: &'a Forwarder,
    id: &'a str,
}

impl<'a> Session<'a> {
    fn open(
        forwarder: &'a Forwarder,
        id: &'a str,
        tx: mpsc::UnboundedSender<EnvelopeCarrier>,
    ) -> Self {
        forwarder.sessions.lock().insert(id.to_string(), tx);
        Self { forwarder, id }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.forwarder.sessions.lock().remove(self.id);
    }
}

/// Writes one relayed reply to the caller, byte for byte, after copying the
/// connection values the target set.
async fn relay(ctx: &Context, carrier: EnvelopeCarrier) {
    let data = carrier.data.unwrap_or_default();
    let body = data.body();
    if let Some(conn) = ctx.conn() {
        for (k, v) in &data.conn_hdr {
            conn.set(k, v);
        }
    }
    let mut hdr = data.hdr;
    if let Some(code) = hdr.remove(STATUS_CODE_HDR).and_then(|c| c.parse().ok()) {
        ctx.set_status_code(code);
    }

    let mut out = ctx.out();
    out.set_hdr_map(hdr);
    if !body.is_empty() {
        out.set_msg(RawMessage(body));
    }
    ctx.flush(out).await;
}

/// First handler of every contract that has an edge selector.
///
/// Runs the selector; when it names another member the rest of the chain is
/// executed there and this instance only relays the response.
pub struct ForwardHandler {
    selector: Arc<dyn EdgeSelector>,
    forwarder: Arc<Forwarder>,
}

impl ForwardHandler {
    pub fn new(selector: Arc<dyn EdgeSelector>, forwarder: Arc<Forwarder>) -> Self {
        Self {
            selector,
            forwarder,
        }
    }

    async fn run(&self, ctx: &mut Context) {
        let selected = self.selector.select(&ctx.limited()).await;
        let target = match selected {
            Ok(Some(target)) if target.server_id() != self.forwarder.me().server_id() => target,
            Ok(_) => return,
            Err(e) => {
                fail(ctx, EdgeError::Selector(e.to_string())).await;
                ctx.stop_execution();
                return;
            }
        };

        if let Err(e) = self.forwarder.forward(ctx, &target).await {
            fail(ctx, e).await;
        }
        ctx.stop_execution();
    }
}

impl Handler for ForwardHandler {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(self.run(ctx))
    }
}

async fn fail(ctx: &Context, err: EdgeError) {
    ctx.set_status_code(err.status_code());
    let mut out = ctx.out();
    out.set_msg(ErrorMessage::from(&err));
    ctx.error(err);
    ctx.flush(out).await;
}

/// Prepends a [`ForwardHandler`] to every contract that declares an edge
/// selector.
pub struct ForwardWrapper {
    forwarder: Arc<Forwarder>,
}

impl ForwardWrapper {
    pub fn new(forwarder: Arc<Forwarder>) -> Self {
        Self { forwarder }
    }
}

impl ContractWrapper for ForwardWrapper {
    fn wrap(&self, contract: BoxedContract) -> BoxedContract {
        match contract.edge_selector() {
            Some(selector) => {
                let forward = ForwardHandler::new(selector, Arc::clone(&self.forwarder));
                ContractWrap::new(contract).pre(Arc::new(forward)).build()
            }
            None => contract,
        }
    }
}
