//! Stock envelope writers.

use async_trait::async_trait;
use serde_json::value::RawValue;

use super::dispatch::RpcContainer;
use super::EnvelopeWriter;
use crate::error::{EdgeError, EdgeResult};
use crate::foundation::{Connection, Envelope};

/// Writes the marshaled message bytes and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawWriter;

#[async_trait]
impl EnvelopeWriter for RawWriter {
    async fn write(&self, conn: &dyn Connection, env: &Envelope) -> EdgeResult<()> {
        conn.write(&env.marshal_msg()?).await.map(|_| ())
    }
}

/// Copies envelope headers into the connection (response headers), then
/// writes the body.
#[derive(Debug, Default, Clone, Copy)]
pub struct RestWriter;

#[async_trait]
impl EnvelopeWriter for RestWriter {
    async fn write(&self, conn: &dyn Connection, env: &Envelope) -> EdgeResult<()> {
        for (k, v) in env.headers() {
            conn.set(k, v);
        }
        conn.write(&env.marshal_msg()?).await.map(|_| ())
    }
}

/// Frames the envelope in an [`RpcContainer`]. The payload must be JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct RpcWriter;

#[async_trait]
impl EnvelopeWriter for RpcWriter {
    async fn write(&self, conn: &dyn Connection, env: &Envelope) -> EdgeResult<()> {
        let body = env.marshal_msg()?;
        let payload = if body.is_empty() {
            None
        } else {
            let text = String::from_utf8(body).map_err(|e| EdgeError::Encode(e.to_string()))?;
            Some(RawValue::from_string(text).map_err(|e| EdgeError::Encode(e.to_string()))?)
        };

        let container = RpcContainer {
            id: env.id().to_string(),
            hdr: env.headers().clone(),
            payload,
        };
        let frame = serde_json::to_vec(&container).map_err(|e| EdgeError::Encode(e.to_string()))?;
        conn.write(&frame).await.map(|_| ())
    }
}
