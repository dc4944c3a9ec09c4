//! Middleware: functions from handler to handler.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns: structured tracing, request-id injection, sessions,
//! and authentication-header inspection.
//!
//! Composition is plain function application. [`pipeline`] builds one
//! middleware out of many, outermost first:
//!
//! ```rust
//! use arbor::middleware::{self, Middleware};
//!
//! let mw_a = middleware::identity();
//! let mw_b = middleware::trace();
//! // Same as `|h| mw_a.apply(mw_b.apply(h))`.
//! let both: Middleware = middleware::pipeline([mw_a, mw_b]);
//! ```
//!
//! The first middleware in a pipeline sees the request first and the response
//! last.

mod trace;

pub use trace::{REQUEST_ID, request_id, trace};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxedHandler, Handler, IntoOutcome, handler};
use crate::message::Request;

/// A function from handler to handler.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>);

impl Middleware {
    pub fn new(f: impl Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Wraps `inner`.
    pub fn apply(&self, inner: impl Handler) -> BoxedHandler {
        (self.0)(inner.into_boxed_handler())
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware")
    }
}

/// Returns the handler unchanged.
pub fn identity() -> Middleware {
    Middleware::new(|inner| inner)
}

/// Folds `middlewares` right to left: `pipeline([a, b, c]).apply(h)` is
/// `a.apply(b.apply(c.apply(h)))`. An empty pipeline is [`identity`].
pub fn pipeline(middlewares: impl IntoIterator<Item = Middleware>) -> Middleware {
    let middlewares: Vec<Middleware> = middlewares.into_iter().collect();
    Middleware::new(move |inner| {
        middlewares.iter().rev().fold(inner, |h, mw| mw.apply(h))
    })
}

/// Middleware written as one async function that receives the request and
/// the next handler.
///
/// ```rust
/// use arbor::middleware;
///
/// let powered_by = middleware::from_fn(|req, next| async move {
///     let res = next.call(req).await?;
///     Ok::<_, arbor::BoxError>(res.add_header("x-powered-by", "arbor"))
/// });
/// ```
pub fn from_fn<F, Fut, R>(f: F) -> Middleware
where
    F: Fn(Request, BoxedHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    let f = Arc::new(f);
    Middleware::new(move |next| {
        let f = Arc::clone(&f);
        handler(move |req: Request| (*f)(req, next.clone()))
    })
}
