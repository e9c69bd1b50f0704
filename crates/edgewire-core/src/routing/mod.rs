//! Route resolution structures for gateways.
//!
//! [`RouteTable`] is what a gateway builds in `register`: a trie per REST
//! method and a predicate map for RPC. Both are populated once at startup and
//! only read afterwards.

pub mod trie;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{EdgeError, EdgeResult};
use crate::foundation::{Encoding, MessageFactory};
use crate::framework::{RouteSelector, Service};
use crate::gateway::ExecuteArg;

pub use trie::{Params, Trie};

/// Where a route leads.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub service_name: String,
    pub contract_id: String,
    /// Display form of the matched selector (`GET /echo/:n`, `rpc:echo`).
    pub route: String,
    pub input: MessageFactory,
    pub encoding: Encoding,
}

impl RouteTarget {
    pub fn execute_arg(&self) -> ExecuteArg {
        ExecuteArg {
            service_name: self.service_name.clone(),
            contract_id: self.contract_id.clone(),
            route: self.route.clone(),
        }
    }
}

/// A resolved REST route with its captured parameters.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub target: &'a RouteTarget,
    pub params: Params,
}

/// REST tries and RPC predicate map for one gateway.
#[derive(Default)]
pub struct RouteTable {
    rest: HashMap<String, Trie<Arc<RouteTarget>>>,
    rpc: HashMap<String, Arc<RouteTarget>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every selector of every contract in `service`.
    pub fn register(&mut self, service: &dyn Service) -> EdgeResult<()> {
        for contract in service.contracts() {
            for selector in contract.route_selectors() {
                let target = Arc::new(RouteTarget {
                    service_name: service.name().to_string(),
                    contract_id: contract.id().to_string(),
                    route: selector.to_string(),
                    input: contract.input(),
                    encoding: contract.encoding(),
                });
                self.insert(selector, target)?;
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, selector: &RouteSelector, target: Arc<RouteTarget>) -> EdgeResult<()> {
        match selector {
            RouteSelector::Rest { method, path } => {
                trace!(%method, %path, contract = %target.contract_id, "Adding REST route");
                self.rest
                    .entry(method.to_ascii_uppercase())
                    .or_default()
                    .insert(path, target)
            }
            RouteSelector::Rpc { predicate } => {
                if self.rpc.contains_key(predicate) {
                    return Err(EdgeError::invalid_route(
                        selector.to_string(),
                        "duplicate predicate",
                    ));
                }
                trace!(%predicate, contract = %target.contract_id, "Adding RPC route");
                self.rpc.insert(predicate.clone(), target);
                Ok(())
            }
        }
    }

    /// Resolves a REST request. `path` must not contain a query string.
    pub fn lookup_rest(&self, method: &str, path: &str) -> EdgeResult<RouteMatch<'_>> {
        self.rest
            .get(&method.to_ascii_uppercase())
            .and_then(|trie| trie.find(path))
            .map(|(target, params)| RouteMatch {
                target: target.as_ref(),
                params,
            })
            .ok_or_else(|| EdgeError::no_handler(format!("{method} {path}")))
    }

    pub fn lookup_rpc(&self, predicate: &str) -> EdgeResult<&RouteTarget> {
        self.rpc
            .get(predicate)
            .map(Arc::as_ref)
            .ok_or_else(|| EdgeError::no_handler(format!("rpc:{predicate}")))
    }

    /// Total number of routes.
    pub fn len(&self) -> usize {
        self.rest.values().map(Trie::len).sum::<usize>() + self.rpc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
