//! Gateway contract.
//!
//! A gateway is a pluggable transport (HTTP, WebSocket, raw TCP...). It owns
//! its listeners and connections and feeds their events into a
//! [`GatewayDelegate`], normally the [`NorthBridge`](crate::bridge::NorthBridge).
//!
//! ```text
//! Transport ──on_message(conn, writer, bytes)──▶ NorthBridge
//!     ▲                                             │
//!     └──────────────── dispatch(ctx, bytes) ◀──────┘
//! ```
//!
//! Gateways must call `on_open`, `on_message` and `on_close` once per event,
//! and never concurrently for the same connection id.

mod dispatch;
mod writer;

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::EdgeResult;
use crate::foundation::{BoxedConnection, Connection, Envelope};
use crate::framework::BoxedService;

pub use dispatch::{DEFAULT_PREDICATE_KEY, RpcContainer, dispatch_rest, dispatch_rpc, split_query};
pub use writer::{RawWriter, RestWriter, RpcWriter};

/// Identity of the chain a request resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecuteArg {
    pub service_name: String,
    pub contract_id: String,
    pub route: String,
}

/// Serializes one outgoing envelope to a connection.
#[async_trait]
pub trait EnvelopeWriter: Send + Sync {
    async fn write(&self, conn: &dyn Connection, env: &Envelope) -> EdgeResult<()>;
}

/// Receiver of gateway events.
#[async_trait]
pub trait GatewayDelegate: Send + Sync {
    fn on_open(&self, conn: &BoxedConnection);

    /// One inbound message. `writer` is the transport's flush path for replies.
    async fn on_message(&self, conn: BoxedConnection, writer: Arc<dyn EnvelopeWriter>, data: &[u8]);

    fn on_close(&self, conn_id: u64);
}

/// A pluggable transport.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn start(&self) -> EdgeResult<()>;

    async fn shutdown(&self) -> EdgeResult<()>;

    /// Builds lookup structures for `service`. Called before `start`.
    fn register(&self, service: &BoxedService) -> EdgeResult<()>;

    fn subscribe(&self, delegate: Arc<dyn GatewayDelegate>);

    /// Resolves `data` against the registered routes and fills the inbound
    /// envelope of `ctx` (headers, decoded message).
    fn dispatch(&self, ctx: &mut Context, data: &[u8]) -> EdgeResult<ExecuteArg>;
}

/// Shared gateway handle.
pub type BoxedGateway = Arc<dyn Gateway>;
