//! Route-table based dispatch for REST and RPC gateways.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::ExecuteArg;
use crate::context::Context;
use crate::error::{EdgeError, EdgeResult};
use crate::routing::RouteTable;

/// Header carrying the RPC predicate by default.
pub const DEFAULT_PREDICATE_KEY: &str = "cmd";

/// JSON framing of RPC messages: `{"id", "hdr", "payload"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcContainer {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub hdr: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

/// Splits `/path?a=1&b=2` into the path and its query pairs.
pub fn split_query(full: &str) -> (&str, Vec<(String, String)>) {
    let Some((path, query)) = full.split_once('?') else {
        return (full, Vec::new());
    };
    let pairs = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect();
    (path, pairs)
}

/// Resolves a REST exchange bound to `ctx`; `data` is the request body.
///
/// Query parameters and then path parameters are stored as inbound headers,
/// so a path parameter wins over a query parameter of the same name.
pub fn dispatch_rest(table: &RouteTable, ctx: &mut Context, data: &[u8]) -> EdgeResult<ExecuteArg> {
    let conn = ctx
        .conn()
        .cloned()
        .ok_or_else(|| EdgeError::DispatchFailed("no connection bound".into()))?;
    let rest = conn
        .as_rest()
        .ok_or_else(|| EdgeError::DispatchFailed("not a REST connection".into()))?;

    let method = rest.method();
    let full_path = rest.path();
    let (path, query) = split_query(&full_path);
    let matched = table.lookup_rest(&method, path)?;
    let msg = matched.target.input.decode(data)?;

    let input = ctx.input_mut();
    input.set_hdr_map(query);
    input.set_hdr_map(matched.params);
    input.set_boxed_msg(msg);
    conn.set("Content-Type", matched.target.encoding.content_type());

    Ok(matched.target.execute_arg())
}

/// Resolves one [`RpcContainer`] frame; the predicate is read from `predicate_key`.
pub fn dispatch_rpc(
    table: &RouteTable,
    predicate_key: &str,
    ctx: &mut Context,
    data: &[u8],
) -> EdgeResult<ExecuteArg> {
    let container: RpcContainer = serde_json::from_slice(data)?;
    let predicate = container
        .hdr
        .get(predicate_key)
        .ok_or_else(|| EdgeError::DispatchFailed(format!("missing '{predicate_key}' header")))?;
    let target = table.lookup_rpc(predicate)?;

    let payload = container.payload.as_deref().map(RawValue::get).unwrap_or("");
    let msg = target.input.decode(payload.as_bytes())?;

    let input = ctx.input_mut();
    input.set_id(container.id);
    input.set_hdr_map(container.hdr);
    input.set_boxed_msg(msg);

    Ok(target.execute_arg())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_query() {
        let (path, q) = split_query("/echo/42?x=1&flag&&y=");
        assert_eq!(path, "/echo/42");
        assert_eq!(
            q,
            vec![
                ("x".to_string(), "1".to_string()),
                ("flag".to_string(), String::new()),
                ("y".to_string(), String::new()),
            ]
        );
        assert_eq!(split_query("/plain").0, "/plain");
    }

    #[test]
    fn test_container_payload_is_raw() {
        let c: RpcContainer =
            serde_json::from_str(r#"{"id":"1","hdr":{"cmd":"echo"},"payload":{"n": 42}}"#).unwrap();
        assert_eq!(c.payload.unwrap().get(), r#"{"n": 42}"#);
        let empty: RpcContainer = serde_json::from_str(r#"{"hdr":{}}"#).unwrap();
        assert!(empty.payload.is_none());
        assert!(empty.id.is_empty());
    }
}
