//! # Edgewire Core
//!
//! The dispatch and forwarding engine of the Edgewire edge server.
//!
//! Services declare contracts (routes + handler chains); gateways turn raw
//! transport traffic into requests; every request runs through a pooled
//! [`Context`]. When a contract carries an edge selector, the request can be
//! transparently forwarded to the cluster member that must execute it.
//!
//! ## Layers
//!
//! ### Foundation
//!
//! - **Messages and envelopes**: [`Message`], [`Envelope`], [`MessageFactory`]
//! - **Connections**: [`Connection`], [`RestConnection`]
//! - **Pools**: [`Pool`], [`Pooled`]
//!
//! ### Framework
//!
//! - **Handlers**: [`Handler`], [`handler`], [`sync_handler`], [`Modifier`]
//! - **Contracts and services**: [`Contract`], [`ContractDesc`], [`Service`], [`ServiceDesc`]
//! - **Wrapping**: [`ContractWrap`], [`ContractWrapper`]
//! - **Registry**: [`Registry`] with the effective chain of every contract
//!
//! ### Execution
//!
//! - **Context**: [`Context`], [`LimitedContext`], [`ContextPool`]
//! - **Routing**: [`RouteTable`] (REST trie + RPC predicates)
//! - **Gateways**: [`Gateway`], [`GatewayDelegate`], stock writers
//! - **Bridges**: [`NorthBridge`] (gateway side), [`SouthBridge`] (cluster side)
//!
//! ### Cluster
//!
//! - **Membership**: [`Cluster`], [`StoreCluster`], [`ClusterStore`], [`Backplane`]
//! - **Forwarding**: [`Forwarder`], [`ForwardWrapper`], [`EnvelopeCarrier`]
//!
//! ## Request flow
//!
//! ```text
//! ┌─────────┐  bytes  ┌─────────────┐  ctx  ┌──────────────────────────────┐
//! │ Gateway │────────▶│ NorthBridge │──────▶│ pre ▸ [forward] ▸ contract ▸ post │
//! └─────────┘         └─────────────┘       └──────────────┬───────────────┘
//!                                                          │ selector picks a peer
//!                                                          ▼
//!                                   ┌──────────┐   ┌─────────────┐
//!                                   │ Cluster  │──▶│ SouthBridge │ (on the peer)
//!                                   └──────────┘   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use edgewire_core::prelude::*;
//!
//! #[derive(Debug, serde::Serialize, serde::Deserialize)]
//! struct Echo { n: u64 }
//!
//! let echo = ContractDesc::new("echo")
//!     .rest("GET", "/echo/:n")
//!     .input::<Echo>()
//!     .handler(handler(|ctx| Box::pin(async move {
//!         let n = ctx.path_param("n").and_then(|n| n.parse().ok()).unwrap_or(0);
//!         let mut out = ctx.out();
//!         out.set_msg(Echo { n });
//!         ctx.send(out).await;
//!     })))
//!     .build();
//!
//! let service = ServiceDesc::new("demo").contract(echo).build();
//! ```

pub mod bridge;
pub mod cluster;
pub mod context;
pub mod error;
pub mod forward;
pub mod foundation;
pub mod framework;
pub mod gateway;
pub mod routing;

#[cfg(any(test, feature = "testing"))]
pub mod testkit;

pub use error::{EdgeError, EdgeResult};

pub use foundation::{
    BoxedConnection, Connection, Encoding, Envelope, ErrorMessage, Message, MessageFactory, Pool,
    Poolable, Pooled, RawMessage, RestConnection,
};

pub use framework::{
    BoxFuture, BoxedContract, BoxedHandler, BoxedService, Contract, ContractDesc, ContractWrap,
    ContractWrapper, EdgeSelector, Handler, Modifier, Registry, RouteInfo, RouteSelector, Service,
    ServiceDesc, handler, modifier, selector_fn, sync_handler,
};

pub use context::{Context, ContextPool, ErrHandler, KvValue, LimitedContext, context_pool};

pub use routing::RouteTable;

pub use gateway::{
    BoxedGateway, EnvelopeWriter, ExecuteArg, Gateway, GatewayDelegate, RawWriter, RestWriter,
    RpcContainer, RpcWriter,
};

pub use bridge::{NorthBridge, SouthBridge, default_error_handler};

pub use cluster::{
    Backplane, BoxedCluster, Cluster, ClusterDelegate, ClusterMember, ClusterStore,
    MemoryBackplane, MemoryStore, StoreCluster, StoreClusterConfig,
};

pub use forward::{EnvelopeCarrier, ForwardWrapper, Forwarder};

/// Prelude for service authors.
pub mod prelude {
    pub use super::cluster::ClusterMember;
    pub use super::context::{Context, KvValue, LimitedContext};
    pub use super::error::{EdgeError, EdgeResult};
    pub use super::foundation::{Encoding, Envelope, ErrorMessage, Message, RawMessage};
    pub use super::framework::{
        BoxFuture, BoxedContract, BoxedHandler, BoxedService, Contract, ContractDesc,
        ContractWrap, ContractWrapper, EdgeSelector, Handler, Modifier, Service, ServiceDesc,
        handler, modifier, selector_fn, sync_handler,
    };
}
