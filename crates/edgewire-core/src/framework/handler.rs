//! Handler and modifier types.
//!
//! A handler is one step of a contract's chain. It receives exclusive access
//! to the request [`Context`] and may:
//!
//! - return, letting the chain driver run the next handler;
//! - `ctx.next().await`, running the rest of the chain before continuing;
//! - `ctx.stop_execution()`, so no later handler runs.
//!
//! ```rust,ignore
//! let auth = handler(|ctx| Box::pin(async move {
//!     if ctx.input().get_hdr("token").is_none() {
//!         ctx.set_status_code(401);
//!         ctx.stop_execution();
//!     }
//! }));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::foundation::Envelope;

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One step of a handler chain.
pub trait Handler: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()>;
}

/// Type-erased, shareable handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Adapter for async closures returning a [`BoxFuture`].
pub struct HandlerFn<F>(F);

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        (self.0)(ctx)
    }
}

/// Adapter for plain synchronous closures.
pub struct SyncHandlerFn<F>(F);

impl<F> Handler for SyncHandlerFn<F>
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        (self.0)(ctx);
        Box::pin(std::future::ready(()))
    }
}

/// Wraps an async closure as a handler.
pub fn handler<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Wraps a synchronous closure as a handler.
pub fn sync_handler<F>(f: F) -> BoxedHandler
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    Arc::new(SyncHandlerFn(f))
}

/// Mutates an outgoing envelope right before it is written (e.g. to inject
/// trace headers).
pub type Modifier = Arc<dyn Fn(&mut Envelope) + Send + Sync>;

/// Wraps a closure as a [`Modifier`].
pub fn modifier<F>(f: F) -> Modifier
where
    F: Fn(&mut Envelope) + Send + Sync + 'static,
{
    Arc::new(f)
}
