//! Registration-time contract registry.
//!
//! The registry is built before traffic starts and is read-only afterwards.
//! Each contract's effective chain (`service pre ++ contract ++ service post`)
//! is concatenated here once, never per request.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::contract::BoxedContract;
use super::handler::{BoxedHandler, Modifier};
use super::service::BoxedService;
use super::wrap::{ContractWrapper, wrap_service};
use crate::error::{EdgeError, EdgeResult};

/// A contract ready for execution.
pub struct RegisteredContract {
    service: String,
    contract: BoxedContract,
    handlers: Vec<BoxedHandler>,
    modifiers: Vec<Modifier>,
}

impl RegisteredContract {
    pub fn service_name(&self) -> &str {
        &self.service
    }

    pub fn contract(&self) -> &BoxedContract {
        &self.contract
    }

    /// The effective handler chain.
    pub fn handlers(&self) -> &[BoxedHandler] {
        &self.handlers
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }
}

impl fmt::Debug for RegisteredContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredContract")
            .field("service", &self.service)
            .field("contract", &self.contract.id())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

/// Summary of one registered contract, for route listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub service: String,
    pub contract: String,
    pub selectors: Vec<String>,
    /// The contract carries an edge selector.
    pub forwarded: bool,
}

/// Maps `(service, contract id)` to an executable chain.
#[derive(Default)]
pub struct Registry {
    services: Vec<BoxedService>,
    contracts: HashMap<String, HashMap<String, Arc<RegisteredContract>>>,
    wrappers: Vec<Arc<dyn ContractWrapper>>,
    routes: Vec<RouteInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a wrapper applied to every contract registered afterwards.
    pub fn add_wrapper(&mut self, wrapper: Arc<dyn ContractWrapper>) {
        self.wrappers.push(wrapper);
    }

    pub fn with_wrapper(mut self, wrapper: Arc<dyn ContractWrapper>) -> Self {
        self.add_wrapper(wrapper);
        self
    }

    /// Registers `service` and returns its wrapped form.
    ///
    /// Nothing is committed if the service name or any contract id is a duplicate.
    pub fn register(&mut self, service: BoxedService) -> EdgeResult<BoxedService> {
        let name = service.name().to_string();
        if self.contracts.contains_key(&name) {
            return Err(EdgeError::DuplicateService(name));
        }

        let wrapped = wrap_service(service, &self.wrappers);
        let pre = wrapped.pre_handlers();
        let post = wrapped.post_handlers();

        let mut seen = HashSet::new();
        let mut entries = HashMap::new();
        let mut routes = Vec::new();
        for contract in wrapped.contracts() {
            let id = contract.id().to_string();
            if !seen.insert(id.clone()) {
                return Err(EdgeError::DuplicateContract {
                    service: name,
                    contract: id,
                });
            }

            let mut handlers = pre.clone();
            handlers.extend(contract.handlers());
            handlers.extend(post.iter().cloned());

            routes.push(RouteInfo {
                service: name.clone(),
                contract: id.clone(),
                selectors: contract.route_selectors().iter().map(|s| s.to_string()).collect(),
                forwarded: contract.edge_selector().is_some(),
            });
            debug!(service = %name, contract = %id, chain_len = handlers.len(), "Contract registered");

            entries.insert(
                id,
                Arc::new(RegisteredContract {
                    service: name.clone(),
                    modifiers: contract.modifiers(),
                    contract,
                    handlers,
                }),
            );
        }

        self.contracts.insert(name, entries);
        self.routes.extend(routes);
        self.services.push(Arc::clone(&wrapped));
        Ok(wrapped)
    }

    pub fn get(&self, service: &str, contract: &str) -> Option<&Arc<RegisteredContract>> {
        self.contracts.get(service)?.get(contract)
    }

    /// Registered (wrapped) services, in registration order.
    pub fn services(&self) -> &[BoxedService] {
        &self.services
    }

    /// Route summary, in registration order.
    pub fn routes(&self) -> &[RouteInfo] {
        &self.routes
    }

    /// Number of registered contracts.
    pub fn len(&self) -> usize {
        self.contracts.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.services.len())
            .field("contracts", &self.len())
            .field("wrappers", &self.wrappers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::contract::ContractDesc;
    use crate::framework::handler::sync_handler;
    use crate::framework::service::ServiceDesc;
    use crate::framework::wrap::ContractWrap;

    fn noop() -> BoxedHandler {
        sync_handler(|_| {})
    }

    #[test]
    fn test_effective_chain_is_pre_contract_post() {
        let pre = noop();
        let own = noop();
        let post = noop();
        let svc = ServiceDesc::new("svc")
            .pre(pre.clone())
            .post(post.clone())
            .contract(ContractDesc::new("c").rest("GET", "/c").handler(own.clone()).build())
            .build();

        let mut registry = Registry::new();
        registry.register(svc).unwrap();

        let entry = registry.get("svc", "c").unwrap();
        let chain = entry.handlers();
        assert_eq!(chain.len(), 3);
        assert!(Arc::ptr_eq(&chain[0], &pre));
        assert!(Arc::ptr_eq(&chain[1], &own));
        assert!(Arc::ptr_eq(&chain[2], &post));
        assert_eq!(registry.routes()[0].selectors, vec!["GET /c".to_string()]);
    }

    #[test]
    fn test_duplicate_service_is_rejected() {
        let mut registry = Registry::new();
        registry.register(ServiceDesc::new("svc").build()).unwrap();
        let err = registry.register(ServiceDesc::new("svc").build()).err().unwrap();
        assert!(matches!(err, EdgeError::DuplicateService(name) if name == "svc"));
    }

    #[test]
    fn test_duplicate_contract_commits_nothing() {
        let svc = ServiceDesc::new("svc")
            .contract(ContractDesc::new("c").build())
            .contract(ContractDesc::new("c").build())
            .build();
        let mut registry = Registry::new();
        let err = registry.register(svc).err().unwrap();
        assert!(matches!(err, EdgeError::DuplicateContract { .. }));
        assert!(registry.is_empty());
        assert!(registry.routes().is_empty());
    }

    #[test]
    fn test_wrappers_apply_to_registered_contracts() {
        let extra = noop();
        let e = extra.clone();
        let mut registry = Registry::new().with_wrapper(Arc::new(move |c: BoxedContract| {
            ContractWrap::new(c).pre(e.clone()).build()
        }));
        registry
            .register(
                ServiceDesc::new("svc")
                    .contract(ContractDesc::new("c").handler(noop()).build())
                    .build(),
            )
            .unwrap();

        let chain = registry.get("svc", "c").unwrap().handlers();
        assert_eq!(chain.len(), 2);
        assert!(Arc::ptr_eq(&chain[0], &extra));
    }
}
