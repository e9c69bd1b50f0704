//! The unit of data flowing in and out of a handler chain.

use std::collections::HashMap;
use std::fmt;

use super::message::Message;
use super::pool::Poolable;
use crate::error::EdgeResult;

/// A [`Message`] plus its headers.
///
/// Besides the per-envelope headers, an envelope keeps a snapshot of the
/// connection's key/value pairs taken when it was created. The snapshot is a
/// copy and is never written back to the live connection.
#[derive(Default)]
pub struct Envelope {
    id: String,
    hdr: HashMap<String, String>,
    conn_hdr: HashMap<String, String>,
    msg: Option<Box<dyn Message>>,
    outgoing: bool,
}

impl Envelope {
    /// Creates an empty inbound envelope.
    pub fn incoming() -> Self {
        Self::default()
    }

    /// Creates an empty outbound envelope.
    pub fn outgoing() -> Self {
        Self {
            outgoing: true,
            ..Default::default()
        }
    }

    /// Returns true for envelopes headed to the connection.
    pub fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    pub(crate) fn set_outgoing(&mut self, outgoing: bool) {
        self.outgoing = outgoing;
    }

    /// Envelope identifier (empty unless the transport supplied one).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = id.into();
        self
    }

    // ─── Headers ───────────────────────────────────────────────────────────

    /// Sets a header; the last write wins.
    pub fn set_hdr(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.hdr.insert(key.into(), value.into());
        self
    }

    /// Sets many headers at once.
    pub fn set_hdr_map<I, K, V>(&mut self, hdr: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in hdr {
            self.hdr.insert(k.into(), v.into());
        }
        self
    }

    pub fn get_hdr(&self, key: &str) -> Option<&str> {
        self.hdr.get(key).map(String::as_str)
    }

    pub(crate) fn remove_hdr(&mut self, key: &str) -> Option<String> {
        self.hdr.remove(key)
    }

    /// Visits every header until `f` returns false.
    pub fn walk_hdr(&self, mut f: impl FnMut(&str, &str) -> bool) {
        for (k, v) in &self.hdr {
            if !f(k, v) {
                break;
            }
        }
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.hdr
    }

    /// Snapshot of the connection's key/value pairs.
    pub fn conn_hdr(&self) -> &HashMap<String, String> {
        &self.conn_hdr
    }

    pub(crate) fn set_conn_hdr(&mut self, conn_hdr: HashMap<String, String>) {
        self.conn_hdr = conn_hdr;
    }

    // ─── Message ───────────────────────────────────────────────────────────

    pub fn set_msg(&mut self, msg: impl Message) -> &mut Self {
        self.msg = Some(Box::new(msg));
        self
    }

    pub fn set_boxed_msg(&mut self, msg: Option<Box<dyn Message>>) -> &mut Self {
        self.msg = msg;
        self
    }

    pub fn msg(&self) -> Option<&dyn Message> {
        self.msg.as_deref()
    }

    /// Returns the message downcast to `T`, if it is one.
    pub fn msg_as<T: Message>(&self) -> Option<&T> {
        self.msg.as_deref().and_then(|m| m.downcast_ref::<T>())
    }

    pub fn take_msg(&mut self) -> Option<Box<dyn Message>> {
        self.msg.take()
    }

    /// Marshals the message; an envelope without a message yields no bytes.
    pub fn marshal_msg(&self) -> EdgeResult<Vec<u8>> {
        match &self.msg {
            Some(msg) => msg.marshal(),
            None => Ok(Vec::new()),
        }
    }
}

impl Poolable for Envelope {
    fn reset(&mut self) {
        self.id.clear();
        self.hdr.clear();
        self.conn_hdr.clear();
        self.msg = None;
        self.outgoing = false;
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("outgoing", &self.outgoing)
            .field("hdr", &self.hdr)
            .field("msg", &self.msg)
            .finish_non_exhaustive()
    }
}
