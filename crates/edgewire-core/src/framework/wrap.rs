//! Contract decorators.
//!
//! A [`ContractWrap`] holds a reference to the wrapped contract plus its own
//! handler and modifier slices. Nothing in the inner contract is mutated;
//! `handlers()`/`modifiers()` are concatenated on each call, which is bounded
//! by the wrap depth.

use std::sync::Arc;

use super::contract::{BoxedContract, Contract, EdgeSelector, RouteSelector};
use super::handler::{BoxedHandler, Modifier};
use super::service::{BoxedService, Service};
use crate::foundation::{Encoding, MessageFactory};

/// Decorator adding handlers and modifiers around an inner contract.
pub struct ContractWrap {
    inner: BoxedContract,
    pre: Vec<BoxedHandler>,
    post: Vec<BoxedHandler>,
    pre_modifiers: Vec<Modifier>,
    post_modifiers: Vec<Modifier>,
}

impl ContractWrap {
    pub fn new(inner: BoxedContract) -> Self {
        Self {
            inner,
            pre: Vec::new(),
            post: Vec::new(),
            pre_modifiers: Vec::new(),
            post_modifiers: Vec::new(),
        }
    }

    pub fn pre(mut self, handler: BoxedHandler) -> Self {
        self.pre.push(handler);
        self
    }

    pub fn post(mut self, handler: BoxedHandler) -> Self {
        self.post.push(handler);
        self
    }

    pub fn pre_modifier(mut self, modifier: Modifier) -> Self {
        self.pre_modifiers.push(modifier);
        self
    }

    pub fn post_modifier(mut self, modifier: Modifier) -> Self {
        self.post_modifiers.push(modifier);
        self
    }

    pub fn build(self) -> BoxedContract {
        Arc::new(self)
    }
}

impl Contract for ContractWrap {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn route_selectors(&self) -> &[RouteSelector] {
        self.inner.route_selectors()
    }

    fn edge_selector(&self) -> Option<Arc<dyn EdgeSelector>> {
        self.inner.edge_selector()
    }

    fn encoding(&self) -> Encoding {
        self.inner.encoding()
    }

    fn input(&self) -> MessageFactory {
        self.inner.input()
    }

    fn handlers(&self) -> Vec<BoxedHandler> {
        let mut out = self.pre.clone();
        out.extend(self.inner.handlers());
        out.extend(self.post.iter().cloned());
        out
    }

    fn modifiers(&self) -> Vec<Modifier> {
        let mut out = self.pre_modifiers.clone();
        out.extend(self.inner.modifiers());
        out.extend(self.post_modifiers.iter().cloned());
        out
    }
}

/// Something that decorates contracts at registration time.
pub trait ContractWrapper: Send + Sync {
    fn wrap(&self, contract: BoxedContract) -> BoxedContract;
}

impl<F> ContractWrapper for F
where
    F: Fn(BoxedContract) -> BoxedContract + Send + Sync,
{
    fn wrap(&self, contract: BoxedContract) -> BoxedContract {
        self(contract)
    }
}

/// Applies `wrappers` in order; the last one ends up outermost.
pub fn wrap_contract(contract: BoxedContract, wrappers: &[Arc<dyn ContractWrapper>]) -> BoxedContract {
    wrappers.iter().fold(contract, |c, w| w.wrap(c))
}

/// A service whose contracts have been passed through wrappers.
struct WrappedService {
    inner: BoxedService,
    contracts: Vec<BoxedContract>,
}

impl Service for WrappedService {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn contracts(&self) -> Vec<BoxedContract> {
        self.contracts.clone()
    }

    fn pre_handlers(&self) -> Vec<BoxedHandler> {
        self.inner.pre_handlers()
    }

    fn post_handlers(&self) -> Vec<BoxedHandler> {
        self.inner.post_handlers()
    }
}

/// Wraps every contract of `service`.
pub fn wrap_service(service: BoxedService, wrappers: &[Arc<dyn ContractWrapper>]) -> BoxedService {
    if wrappers.is_empty() {
        return service;
    }
    let contracts = service
        .contracts()
        .into_iter()
        .map(|c| wrap_contract(c, wrappers))
        .collect();
    Arc::new(WrappedService {
        inner: service,
        contracts,
    })
}
