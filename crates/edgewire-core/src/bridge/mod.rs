//! Bridges between the outer layers and the handler chains.
//!
//! | Bridge | Implements | Driven by |
//! |---|---|---|
//! | [`NorthBridge`] | [`GatewayDelegate`](crate::gateway::GatewayDelegate) | a gateway, one per gateway |
//! | [`SouthBridge`] | [`ClusterDelegate`](crate::cluster::ClusterDelegate) | the cluster |
//!
//! ```text
//! Gateway ──▶ NorthBridge ──▶ Context chain ──▶ ForwardHandler ──▶ Cluster
//!                                                                    │
//! Cluster ──▶ SouthBridge ──▶ Context chain (resumed) ──▶ CarrierWriter
//! ```
//!
//! Both bridges own the full lifetime of the contexts they acquire: every
//! context goes back to the pool, also when a handler panics.

mod north;
mod south;

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::{Arc, Once};

use tracing::error;

use crate::context::ErrHandler;
use crate::error::EdgeError;

pub use north::NorthBridge;
pub use south::SouthBridge;

/// Error handler that only logs.
pub fn default_error_handler() -> ErrHandler {
    Arc::new(|ctx, err| match ctx {
        Some(ctx) => error!(
            service = %ctx.service_name(),
            route = %ctx.route(),
            client_ip = %ctx.client_ip(),
            error = %err,
            "Request failed"
        ),
        None => error!(error = %err, "Edge error"),
    })
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chains a panic hook that records the backtrace of the panicking thread
/// before unwinding starts. The previous hook still runs.
pub(crate) fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Turns a caught panic payload into an [`EdgeError::Panic`].
///
/// Must run on the thread that panicked, right after the unwind was caught,
/// to pick up the backtrace recorded by the hook.
pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> EdgeError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    let backtrace = PANIC_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string());
    EdgeError::Panic { message, backtrace }
}
