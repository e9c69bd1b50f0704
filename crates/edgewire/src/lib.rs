//! # Edgewire
//!
//! A multi-protocol edge server runtime with transparent cross-instance
//! forwarding.
//!
//! ## Overview
//!
//! Services declare contracts: routes for REST and RPC traffic plus a chain
//! of handlers. Gateways turn transport traffic into requests and every
//! request runs its contract's chain. A contract may carry an edge selector;
//! when it picks another cluster member the request is executed there and
//! the response streams back through the original connection.
//!
//! ```text
//! ┌──────────┐     ┌──────────────┐     ┌──────────────────────────────┐
//! │ Gateways │────▶│  EdgeServer  │────▶│ pre ▸ contract chain ▸ post  │
//! └──────────┘     │ (this crate) │     └──────────────┬───────────────┘
//!                  └──────┬───────┘                    │ edge selector
//!                         │ membership                 ▼
//!                         └──────────────────▶  Cluster (peer executes)
//! ```
//!
//! - **Core** ([`core`]): contexts, contracts, routing, bridges, forwarding
//! - **Runtime** ([`runtime`]): configuration, logging, server lifecycle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use edgewire::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hello = ContractDesc::new("hello")
//!         .rest("GET", "/hello/:name")
//!         .handler(handler(|ctx| Box::pin(async move {
//!             let name = ctx.path_param("name").unwrap_or("world").to_string();
//!             let mut out = ctx.out();
//!             out.set_msg(serde_json::json!({ "hello": name }));
//!             ctx.send(out).await;
//!         })))
//!         .build();
//!
//!     EdgeServer::builder()
//!         .gateway(my_gateway)
//!         .service(ServiceDesc::new("greeter").contract(hello).build())
//!         .build()?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output
//! - `testing`: in-memory gateways and connections (`core::testkit`)

pub use edgewire_core as core;
pub use edgewire_runtime as runtime;

/// Commonly used types for building edge services.
///
/// ```rust,ignore
/// use edgewire::prelude::*;
/// ```
pub mod prelude {
    // Server lifecycle
    pub use edgewire_runtime::{EdgeConfig, EdgeServer, RuntimeError, RuntimeResult};

    // Contracts, handlers and the request context
    pub use edgewire_core::prelude::*;

    // Transport and cluster seams for custom implementations
    pub use edgewire_core::{
        Backplane, BoxedGateway, Cluster, ClusterStore, Connection, Gateway, GatewayDelegate,
        RestConnection,
    };

    pub use edgewire_runtime::prelude::*;
}
