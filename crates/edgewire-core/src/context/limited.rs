//! Restricted view of a [`Context`] handed to edge selectors.

use std::fmt;

use super::Context;
use crate::foundation::{BoxedConnection, Envelope};

/// Read-mostly view of a request.
///
/// Exposes the connection, the inbound envelope and the route identity, plus
/// preset header setters. The handler chain and the flush path are not
/// reachable from here.
#[derive(Clone, Copy)]
pub struct LimitedContext<'a> {
    ctx: &'a Context,
}

impl<'a> LimitedContext<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub fn conn(&self) -> Option<&'a BoxedConnection> {
        self.ctx.conn()
    }

    pub fn client_ip(&self) -> String {
        self.ctx.client_ip()
    }

    pub fn input(&self) -> &'a Envelope {
        self.ctx.input()
    }

    pub fn service_name(&self) -> String {
        self.ctx.service_name()
    }

    pub fn contract_id(&self) -> String {
        self.ctx.contract_id()
    }

    pub fn route(&self) -> String {
        self.ctx.route()
    }

    pub fn is_rest(&self) -> bool {
        self.ctx.is_rest()
    }

    pub fn path_param(&self, name: &str) -> Option<&'a str> {
        self.ctx.path_param(name)
    }

    /// See [`Context::preset_hdr`].
    pub fn preset_hdr(&self, key: impl Into<String>, value: impl Into<String>) {
        self.ctx.preset_hdr(key, value);
    }

    pub fn preset_hdr_map<I, K, V>(&self, hdr: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.ctx.preset_hdr_map(hdr);
    }
}

impl fmt::Debug for LimitedContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitedContext")
            .field("service", &self.service_name())
            .field("contract", &self.contract_id())
            .field("route", &self.route())
            .finish_non_exhaustive()
    }
}
