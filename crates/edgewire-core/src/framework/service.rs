//! Services group contracts and share pre/post handlers around them.

use std::fmt;
use std::sync::Arc;

use super::contract::BoxedContract;
use super::handler::BoxedHandler;

/// A named group of contracts.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn contracts(&self) -> Vec<BoxedContract>;

    /// Run before every contract's own handlers.
    fn pre_handlers(&self) -> Vec<BoxedHandler>;

    /// Run after every contract's own handlers.
    fn post_handlers(&self) -> Vec<BoxedHandler>;
}

/// Shared service handle.
pub type BoxedService = Arc<dyn Service>;

/// Builder-style service descriptor.
#[derive(Clone)]
pub struct ServiceDesc {
    name: String,
    contracts: Vec<BoxedContract>,
    pre: Vec<BoxedHandler>,
    post: Vec<BoxedHandler>,
}

impl ServiceDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contracts: Vec::new(),
            pre: Vec::new(),
            post: Vec::new(),
        }
    }

    pub fn contract(mut self, contract: BoxedContract) -> Self {
        self.contracts.push(contract);
        self
    }

    pub fn pre(mut self, handler: BoxedHandler) -> Self {
        self.pre.push(handler);
        self
    }

    pub fn post(mut self, handler: BoxedHandler) -> Self {
        self.post.push(handler);
        self
    }

    pub fn build(self) -> BoxedService {
        Arc::new(self)
    }
}

impl Service for ServiceDesc {
    fn name(&self) -> &str {
        &self.name
    }

    fn contracts(&self) -> Vec<BoxedContract> {
        self.contracts.clone()
    }

    fn pre_handlers(&self) -> Vec<BoxedHandler> {
        self.pre.clone()
    }

    fn post_handlers(&self) -> Vec<BoxedHandler> {
        self.post.clone()
    }
}

impl fmt::Debug for ServiceDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDesc")
            .field("name", &self.name)
            .field("contracts", &self.contracts.iter().map(|c| c.id()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
