//! Foundation layer: messages, envelopes, connections and pools.

pub mod connection;
pub mod envelope;
pub mod message;
pub mod pool;

pub use connection::{BoxedConnection, Connection, RestConnection, snapshot};
pub use envelope::Envelope;
pub use message::{Encoding, ErrorMessage, Message, MessageFactory, RawMessage};
pub use pool::{Pool, Poolable, Pooled};
