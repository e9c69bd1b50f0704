//! Wire format of forwarded envelopes.
//!
//! ```json
//! {"id": "<session>", "kind": 1, "originID": "a", "targetID": "b",
//!  "data": {"envelopID": "...", "connHdr": {}, "hdr": {}, "isREST": true,
//!           "msg": {...}, "cid": "echo", "svc": "demo", "idx": 1,
//!           "route": "GET /echo/:n"}}
//! ```
//!
//! `originID` is the sender of the frame and `targetID` its receiver, so the
//! two swap between a request and its replies. JSON message bodies are
//! embedded verbatim in `msg`; anything else travels in `bin`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::context::Context;
use crate::error::{EdgeError, EdgeResult};
use crate::foundation::Envelope;

/// Reply header carrying the response status code of the target.
pub const STATUS_CODE_HDR: &str = "__StatusCode__";

/// Direction of a carrier frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum CarrierKind {
    /// Origin to target: execute this request.
    Outgoing = 1,
    /// Target to origin: one response envelope.
    Incoming = 2,
    /// Target to origin: the response is complete.
    Eof = 3,
}

impl TryFrom<u8> for CarrierKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Outgoing),
            2 => Ok(Self::Incoming),
            3 => Ok(Self::Eof),
            other => Err(format!("unknown carrier kind {other}")),
        }
    }
}

impl From<CarrierKind> for u8 {
    fn from(kind: CarrierKind) -> Self {
        kind as u8
    }
}

/// The envelope payload of a carrier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarrierData {
    #[serde(rename = "envelopID", default)]
    pub envelope_id: String,
    #[serde(rename = "connHdr", default)]
    pub conn_hdr: HashMap<String, String>,
    #[serde(default)]
    pub hdr: HashMap<String, String>,
    #[serde(rename = "isREST", default)]
    pub is_rest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<Vec<u8>>,
    #[serde(rename = "clientIP", default, skip_serializing_if = "String::is_empty")]
    pub client_ip: String,
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub svc: String,
    #[serde(default)]
    pub idx: usize,
    #[serde(default)]
    pub route: String,
}

impl CarrierData {
    /// Stores `body` in `msg` when it is JSON, in `bin` otherwise.
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.msg = None;
        self.bin = None;
        if body.is_empty() {
            return;
        }
        let is_json = serde_json::from_slice::<&RawValue>(&body).is_ok();
        match String::from_utf8(body) {
            Ok(text) if is_json => self.msg = RawValue::from_string(text).ok(),
            Ok(text) => self.bin = Some(text.into_bytes()),
            Err(e) => self.bin = Some(e.into_bytes()),
        }
    }

    /// The message bytes exactly as the sender marshaled them.
    pub fn body(&self) -> Vec<u8> {
        match (&self.msg, &self.bin) {
            (Some(raw), _) => raw.get().as_bytes().to_vec(),
            (None, Some(bin)) => bin.clone(),
            (None, None) => Vec::new(),
        }
    }
}

/// One frame exchanged between two members during a forwarding session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeCarrier {
    #[serde(rename = "id")]
    pub session_id: String,
    pub kind: CarrierKind,
    #[serde(rename = "originID")]
    pub origin_id: String,
    #[serde(rename = "targetID")]
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<CarrierData>,
}

impl EnvelopeCarrier {
    /// Captures the request bound to `ctx`, to be resumed after the running
    /// handler on `target_id`.
    pub fn outgoing(
        session_id: &str,
        origin_id: &str,
        target_id: &str,
        ctx: &Context,
    ) -> EdgeResult<Self> {
        let input = ctx.input();
        let mut data = CarrierData {
            envelope_id: input.id().to_string(),
            conn_hdr: input.conn_hdr().clone(),
            hdr: input.headers().clone(),
            is_rest: ctx.is_rest(),
            client_ip: ctx.client_ip(),
            cid: ctx.contract_id(),
            svc: ctx.service_name(),
            idx: ctx.cursor(),
            route: ctx.route(),
            ..CarrierData::default()
        };
        data.set_body(input.marshal_msg()?);
        Ok(Self::new(CarrierKind::Outgoing, session_id, origin_id, target_id, Some(data)))
    }

    /// One reply envelope. `status` is the status code the target set, if
    /// any; `conn_hdr` the values its handlers stored on the connection.
    pub fn incoming(
        session_id: &str,
        origin_id: &str,
        target_id: &str,
        env: &Envelope,
        status: Option<u16>,
        conn_hdr: HashMap<String, String>,
    ) -> EdgeResult<Self> {
        let mut data = CarrierData {
            envelope_id: env.id().to_string(),
            conn_hdr,
            hdr: env.headers().clone(),
            ..CarrierData::default()
        };
        if let Some(code) = status {
            data.hdr.insert(STATUS_CODE_HDR.to_string(), code.to_string());
        }
        data.set_body(env.marshal_msg()?);
        Ok(Self::new(CarrierKind::Incoming, session_id, origin_id, target_id, Some(data)))
    }

    pub fn eof(session_id: &str, origin_id: &str, target_id: &str) -> Self {
        Self::new(CarrierKind::Eof, session_id, origin_id, target_id, None)
    }

    fn new(
        kind: CarrierKind,
        session_id: &str,
        origin_id: &str,
        target_id: &str,
        data: Option<CarrierData>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
            origin_id: origin_id.to_string(),
            target_id: target_id.to_string(),
            data,
        }
    }

    pub fn to_bytes(&self) -> EdgeResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| EdgeError::Encode(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> EdgeResult<Self> {
        serde_json::from_slice(data).map_err(|e| EdgeError::Cluster(format!("malformed carrier: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let mut data = CarrierData {
            envelope_id: "e1".into(),
            is_rest: true,
            cid: "echo".into(),
            svc: "demo".into(),
            idx: 1,
            route: "GET /echo/:n".into(),
            ..CarrierData::default()
        };
        data.hdr.insert("n".into(), "42".into());
        data.set_body(br#"{"n": 42}"#.to_vec());
        let carrier = EnvelopeCarrier::new(CarrierKind::Outgoing, "s1", "a", "b", Some(data));

        let value: serde_json::Value = serde_json::from_slice(&carrier.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "s1",
                "kind": 1,
                "originID": "a",
                "targetID": "b",
                "data": {
                    "envelopID": "e1",
                    "connHdr": {},
                    "hdr": {"n": "42"},
                    "isREST": true,
                    "msg": {"n": 42},
                    "cid": "echo",
                    "svc": "demo",
                    "idx": 1,
                    "route": "GET /echo/:n"
                }
            })
        );
    }

    #[test]
    fn test_body_bytes_are_preserved() {
        let mut data = CarrierData::default();
        // whitespace and key order survive
        data.set_body(br#"{ "b":1,  "a":2 }"#.to_vec());
        let carrier = EnvelopeCarrier::new(CarrierKind::Incoming, "s", "b", "a", Some(data));
        let back = EnvelopeCarrier::from_bytes(&carrier.to_bytes().unwrap()).unwrap();
        assert_eq!(back.data.unwrap().body(), br#"{ "b":1,  "a":2 }"#.to_vec());

        let mut data = CarrierData::default();
        data.set_body(vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(data.msg.is_none());
        assert_eq!(data.body(), vec![0xde, 0xad, 0xbe, 0xef]);

        let mut data = CarrierData::default();
        data.set_body(b"plain text".to_vec());
        assert!(data.msg.is_none());
        assert_eq!(data.body(), b"plain text".to_vec());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let frame = br#"{"id":"s","kind":9,"originID":"a","targetID":"b"}"#;
        assert!(EnvelopeCarrier::from_bytes(frame).is_err());
        let eof = EnvelopeCarrier::from_bytes(br#"{"id":"s","kind":3,"originID":"b","targetID":"a"}"#).unwrap();
        assert_eq!(eof.kind, CarrierKind::Eof);
        assert!(eof.data.is_none());
    }
}
