//! Framework layer: handlers, contracts, services, wrapping and the registry.

pub mod contract;
pub mod handler;
pub mod registry;
pub mod service;
pub mod wrap;

pub use contract::{
    BoxedContract, Contract, ContractDesc, EdgeSelector, RouteSelector, SelectorFn, selector_fn,
};
pub use handler::{
    BoxFuture, BoxedHandler, Handler, HandlerFn, Modifier, SyncHandlerFn, handler, modifier,
    sync_handler,
};
pub use registry::{RegisteredContract, Registry, RouteInfo};
pub use service::{BoxedService, Service, ServiceDesc};
pub use wrap::{ContractWrap, ContractWrapper, wrap_contract, wrap_service};
