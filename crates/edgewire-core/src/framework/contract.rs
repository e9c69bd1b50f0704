//! Contracts: routable units of business logic.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::handler::{BoxedHandler, Modifier};
use crate::cluster::ClusterMember;
use crate::context::LimitedContext;
use crate::error::EdgeResult;
use crate::foundation::{Encoding, Message, MessageFactory};

/// Transport-specific matching data.
///
/// Each gateway picks the variants it understands and ignores the rest, so a
/// single contract can be served over several transports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteSelector {
    /// HTTP-like method + path pattern (`/users/:id`, `/files/*path`).
    Rest { method: String, path: String },
    /// Predicate string for RPC-style transports.
    Rpc { predicate: String },
}

impl RouteSelector {
    pub fn rest(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Rest {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
        }
    }

    pub fn rpc(predicate: impl Into<String>) -> Self {
        Self::Rpc {
            predicate: predicate.into(),
        }
    }
}

impl fmt::Display for RouteSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rest { method, path } => write!(f, "{method} {path}"),
            Self::Rpc { predicate } => write!(f, "rpc:{predicate}"),
        }
    }
}

/// Decides which cluster member must execute a request.
///
/// `Ok(None)` (or the local member) means "execute here".
#[async_trait]
pub trait EdgeSelector: Send + Sync {
    async fn select(&self, ctx: &LimitedContext<'_>) -> EdgeResult<Option<ClusterMember>>;
}

/// Adapter for synchronous selector closures.
pub struct SelectorFn<F>(F);

#[async_trait]
impl<F> EdgeSelector for SelectorFn<F>
where
    F: Fn(&LimitedContext<'_>) -> EdgeResult<Option<ClusterMember>> + Send + Sync,
{
    async fn select(&self, ctx: &LimitedContext<'_>) -> EdgeResult<Option<ClusterMember>> {
        (self.0)(ctx)
    }
}

/// Wraps a closure as an [`EdgeSelector`].
pub fn selector_fn<F>(f: F) -> Arc<dyn EdgeSelector>
where
    F: Fn(&LimitedContext<'_>) -> EdgeResult<Option<ClusterMember>> + Send + Sync + 'static,
{
    Arc::new(SelectorFn(f))
}

/// A registered, routable unit of business logic.
pub trait Contract: Send + Sync {
    /// Unique within its service and stable across restarts; peers use it to
    /// find the same chain when a request is forwarded.
    fn id(&self) -> &str;

    fn route_selectors(&self) -> &[RouteSelector];

    fn edge_selector(&self) -> Option<Arc<dyn EdgeSelector>>;

    fn encoding(&self) -> Encoding;

    /// Decoder for the input message.
    fn input(&self) -> MessageFactory;

    fn handlers(&self) -> Vec<BoxedHandler>;

    fn modifiers(&self) -> Vec<Modifier>;
}

/// Shared contract handle.
pub type BoxedContract = Arc<dyn Contract>;

/// Builder-style contract descriptor.
///
/// ```rust,ignore
/// let echo = ContractDesc::new("echo")
///     .rest("GET", "/echo/:n")
///     .rpc("echo")
///     .input::<EchoRequest>()
///     .handler(echo_handler)
///     .build();
/// ```
#[derive(Clone)]
pub struct ContractDesc {
    id: String,
    selectors: Vec<RouteSelector>,
    edge_selector: Option<Arc<dyn EdgeSelector>>,
    encoding: Encoding,
    input: MessageFactory,
    handlers: Vec<BoxedHandler>,
    modifiers: Vec<Modifier>,
}

impl ContractDesc {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            selectors: Vec::new(),
            edge_selector: None,
            encoding: Encoding::default(),
            input: MessageFactory::none(),
            handlers: Vec::new(),
            modifiers: Vec::new(),
        }
    }

    pub fn route(mut self, selector: RouteSelector) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn rest(self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.route(RouteSelector::rest(method, path))
    }

    pub fn rpc(self, predicate: impl Into<String>) -> Self {
        self.route(RouteSelector::rpc(predicate))
    }

    /// Makes the request subject to forwarding.
    pub fn selector(mut self, selector: Arc<dyn EdgeSelector>) -> Self {
        self.edge_selector = Some(selector);
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Decodes the input as JSON into `T`.
    pub fn input<T>(mut self) -> Self
    where
        T: serde::de::DeserializeOwned + Message,
    {
        self.input = MessageFactory::json::<T>();
        self
    }

    /// Keeps the input bytes as a `RawMessage`.
    pub fn raw_input(mut self) -> Self {
        self.input = MessageFactory::raw();
        self
    }

    pub fn handler(mut self, handler: BoxedHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn build(self) -> BoxedContract {
        Arc::new(self)
    }
}

impl Contract for ContractDesc {
    fn id(&self) -> &str {
        &self.id
    }

    fn route_selectors(&self) -> &[RouteSelector] {
        &self.selectors
    }

    fn edge_selector(&self) -> Option<Arc<dyn EdgeSelector>> {
        self.edge_selector.clone()
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn input(&self) -> MessageFactory {
        self.input.clone()
    }

    fn handlers(&self) -> Vec<BoxedHandler> {
        self.handlers.clone()
    }

    fn modifiers(&self) -> Vec<Modifier> {
        self.modifiers.clone()
    }
}

impl fmt::Debug for ContractDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractDesc")
            .field("id", &self.id)
            .field("selectors", &self.selectors)
            .field("forwarding", &self.edge_selector.is_some())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
