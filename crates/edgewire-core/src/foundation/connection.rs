//! Transport-agnostic connection handle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EdgeResult;

/// A connection produced by a gateway.
///
/// Besides byte-oriented writes, a connection carries a small key/value bag
/// (for example the request headers of an HTTP exchange, or values stored by
/// handlers for the lifetime of a WebSocket session).
#[async_trait]
pub trait Connection: Send + Sync {
    /// Process-unique connection id.
    fn id(&self) -> u64;

    /// Remote address of the peer.
    fn client_ip(&self) -> String;

    /// Writes one frame. Returns the number of bytes written.
    async fn write(&self, data: &[u8]) -> EdgeResult<usize>;

    /// True for long-lived connections that can carry many requests.
    fn is_streaming(&self) -> bool;

    /// Visits every key/value pair until `f` returns false.
    fn walk(&self, f: &mut dyn FnMut(&str, &str) -> bool);

    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    /// Returns the REST view of this connection, if it is a REST exchange.
    fn as_rest(&self) -> Option<&dyn RestConnection> {
        None
    }
}

/// Extra capabilities of a request/response (HTTP-like) connection.
pub trait RestConnection: Connection {
    fn method(&self) -> String;

    /// Request path, including any query string.
    fn path(&self) -> String;

    fn set_status_code(&self, code: u16);

    fn status_code(&self) -> u16;
}

/// Shared connection handle.
pub type BoxedConnection = Arc<dyn Connection>;

/// Copies all key/value pairs of `conn`.
pub fn snapshot(conn: &dyn Connection) -> HashMap<String, String> {
    let mut out = HashMap::new();
    conn.walk(&mut |k, v| {
        out.insert(k.to_string(), v.to_string());
        true
    });
    out
}
