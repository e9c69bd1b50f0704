//! Target-side stand-ins for the caller's connection.
//!
//! A forwarded request executes against a [`ClusterConn`] rebuilt from the
//! carrier; everything written to it, directly or through the
//! [`CarrierWriter`], travels back to the origin as incoming carriers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::carrier::{CarrierData, EnvelopeCarrier};
use crate::cluster::{BoxedCluster, Cluster};
use crate::error::{EdgeError, EdgeResult};
use crate::foundation::{Connection, Envelope, ErrorMessage, RestConnection, snapshot};
use crate::gateway::EnvelopeWriter;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Return address of one forwarding session.
pub struct ReplyPath {
    cluster: BoxedCluster,
    session_id: String,
    origin_id: String,
}

impl ReplyPath {
    pub fn new(cluster: BoxedCluster, session_id: impl Into<String>, origin_id: impl Into<String>) -> Self {
        Self {
            cluster,
            session_id: session_id.into(),
            origin_id: origin_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    fn me(&self) -> &str {
        self.cluster.me().server_id()
    }

    async fn publish(&self, carrier: EnvelopeCarrier) -> EdgeResult<()> {
        self.cluster
            .publish(&self.origin_id, carrier.to_bytes()?)
            .await
            .map_err(|e| EdgeError::forward(&self.origin_id, e))
    }

    /// Sends one reply envelope together with the connection values to
    /// apply on the caller's side.
    pub async fn reply(
        &self,
        env: &Envelope,
        status: Option<u16>,
        conn_hdr: HashMap<String, String>,
    ) -> EdgeResult<()> {
        let carrier =
            EnvelopeCarrier::incoming(&self.session_id, self.me(), &self.origin_id, env, status, conn_hdr)?;
        self.publish(carrier).await
    }

    /// Sends the generic failure response for `err`.
    pub async fn reply_error(&self, err: &EdgeError) -> EdgeResult<()> {
        let mut env = Envelope::outgoing();
        env.set_msg(ErrorMessage::from(err));
        self.reply(&env, Some(err.status_code()), HashMap::new()).await
    }

    /// Closes the session on the origin.
    pub async fn eof(&self) -> EdgeResult<()> {
        self.publish(EnvelopeCarrier::eof(&self.session_id, self.me(), &self.origin_id))
            .await
    }
}

impl fmt::Debug for ReplyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyPath")
            .field("session_id", &self.session_id)
            .field("origin_id", &self.origin_id)
            .finish_non_exhaustive()
    }
}

/// Connection replayed from an outgoing carrier.
#[derive(Debug)]
pub struct ClusterConn {
    id: u64,
    client_ip: String,
    kv: Mutex<HashMap<String, String>>,
    rest: Option<(String, String)>,
    status: AtomicU16,
    reply: Arc<ReplyPath>,
}

impl ClusterConn {
    pub fn new(data: &CarrierData, reply: Arc<ReplyPath>) -> Self {
        let rest = data.is_rest.then(|| match data.route.split_once(' ') {
            Some((method, path)) => (method.to_string(), path.to_string()),
            None => (String::new(), data.route.clone()),
        });
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            client_ip: data.client_ip.clone(),
            kv: Mutex::new(data.conn_hdr.clone()),
            rest,
            status: AtomicU16::new(200),
            reply,
        }
    }

    fn status(&self) -> Option<u16> {
        self.rest.as_ref().map(|_| self.status.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl Connection for ClusterConn {
    fn id(&self) -> u64 {
        self.id
    }

    fn client_ip(&self) -> String {
        self.client_ip.clone()
    }

    async fn write(&self, data: &[u8]) -> EdgeResult<usize> {
        let mut env = Envelope::outgoing();
        env.set_msg(crate::foundation::RawMessage(data.to_vec()));
        let snapshot = self.kv.lock().clone();
        self.reply.reply(&env, self.status(), snapshot).await?;
        Ok(data.len())
    }

    fn is_streaming(&self) -> bool {
        false
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

impl RestConnection for ClusterConn {
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
        self.status.load(Ordering::Relaxed)
    }
}

/// Publishes every flushed envelope back to the origin as an incoming carrier.
#[derive(Debug)]
pub struct CarrierWriter {
    reply: Arc<ReplyPath>,
}

impl CarrierWriter {
    pub fn new(reply: Arc<ReplyPath>) -> Self {
        Self { reply }
    }
}

#[async_trait]
impl EnvelopeWriter for CarrierWriter {
    async fn write(&self, conn: &dyn Connection, env: &Envelope) -> EdgeResult<()> {
        let status = conn.as_rest().map(|r| r.status_code());
        self.reply.reply(env, status, snapshot(conn)).await
    }
}
