//! Cross-instance forwarding.
//!
//! When a contract's edge selector names another member, the origin captures
//! the request in an [`EnvelopeCarrier`], ships it over the cluster and parks
//! the handler until the target answers. The target resumes the same chain
//! right after the forwarding step and streams its output back as incoming
//! carriers, closed by an eof carrier.
//!
//! ```text
//! origin                                   target
//!   ForwardHandler ──outgoing(idx)──────────▶ SouthBridge
//!        │                                     skip_to(idx), next()
//!        ◀────────── incoming × n ──────────── CarrierWriter
//!        ◀────────── eof ────────────────────┘
//! ```
//!
//! Forwarding is single hop: a forwarded request never forwards again.

mod carrier;
mod conn;
mod forwarder;

pub use carrier::{CarrierData, CarrierKind, EnvelopeCarrier, STATUS_CODE_HDR};
pub use conn::{CarrierWriter, ClusterConn, ReplyPath};
pub use forwarder::{DEFAULT_FORWARD_TIMEOUT, ForwardHandler, ForwardWrapper, Forwarder};
