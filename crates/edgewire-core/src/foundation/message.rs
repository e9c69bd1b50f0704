//! Message abstractions.
//!
//! A [`Message`] is the opaque application payload carried by an
//! [`Envelope`](super::envelope::Envelope). Any `Serialize` type is a message
//! and marshals as JSON; types that need their own wire bytes (such as
//! [`RawMessage`]) implement the trait directly.

use std::any::Any;
use std::fmt::{self, Debug};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{EdgeError, EdgeResult};

/// Application payload that can be written to a connection.
pub trait Message: Any + Send + Sync + Debug {
    /// Encodes the message into its wire bytes.
    fn marshal(&self) -> EdgeResult<Vec<u8>>;

    /// Returns `self` as `&dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T> Message for T
where
    T: Serialize + Any + Send + Sync + Debug,
{
    fn marshal(&self) -> EdgeResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| EdgeError::Encode(e.to_string()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn Message {
    /// Attempts to downcast the message to a concrete type.
    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns true if the message is of type `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Pre-encoded bytes, written to the wire verbatim.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RawMessage(pub Vec<u8>);

impl RawMessage {
    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.debug_tuple("RawMessage").field(&s).finish(),
            Err(_) => f
                .debug_tuple("RawMessage")
                .field(&format_args!("{} bytes", self.0.len()))
                .finish(),
        }
    }
}

impl Message for RawMessage {
    fn marshal(&self) -> EdgeResult<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Generic failure response sent when a request cannot be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// HTTP-like status code.
    pub code: u16,
    /// Human readable description.
    pub item: String,
}

impl From<&EdgeError> for ErrorMessage {
    fn from(err: &EdgeError) -> Self {
        Self {
            code: err.status_code(),
            item: err.to_string(),
        }
    }
}

/// Wire encoding declared by a contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON documents (default).
    #[default]
    Json,
    /// Opaque binary payloads.
    Binary,
    /// Plain UTF-8 text.
    Text,
}

impl Encoding {
    /// MIME type announced to REST clients.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Binary => "application/octet-stream",
            Self::Text => "text/plain; charset=utf-8",
        }
    }
}

type DecodeFn = dyn Fn(&[u8]) -> EdgeResult<Box<dyn Message>> + Send + Sync;

/// Decoder that turns inbound bytes into a contract's input message.
///
/// An empty payload always decodes to "no message".
#[derive(Clone)]
pub struct MessageFactory {
    type_name: &'static str,
    decode: Option<Arc<DecodeFn>>,
}

impl MessageFactory {
    /// Decodes JSON into `T`.
    pub fn json<T>() -> Self
    where
        T: DeserializeOwned + Message,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            decode: Some(Arc::new(|data: &[u8]| {
                let msg: T = serde_json::from_slice(data)?;
                Ok(Box::new(msg) as Box<dyn Message>)
            })),
        }
    }

    /// Keeps the bytes as a [`RawMessage`].
    pub fn raw() -> Self {
        Self {
            type_name: std::any::type_name::<RawMessage>(),
            decode: Some(Arc::new(|data: &[u8]| {
                Ok(Box::new(RawMessage(data.to_vec())) as Box<dyn Message>)
            })),
        }
    }

    /// Contract takes no input; any payload is ignored.
    pub fn none() -> Self {
        Self {
            type_name: "()",
            decode: None,
        }
    }

    /// Name of the produced type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Decodes `data`; returns `Ok(None)` for empty payloads.
    pub fn decode(&self, data: &[u8]) -> EdgeResult<Option<Box<dyn Message>>> {
        match &self.decode {
            Some(decode) if !data.is_empty() => decode(data).map(Some),
            _ => Ok(None),
        }
    }
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::none()
    }
}

impl Debug for MessageFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFactory")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}
