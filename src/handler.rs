//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! Routes, middleware and the server all need to hold handlers of *different*
//! concrete types side by side, so every handler is erased behind a trait
//! object and passed around as a [`BoxedHandler`].
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }   ← user writes this
//!        ↓ get("/", hello)
//! hello.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! BoxedHandler(Arc::new(FnHandler(hello)))         ← heap-allocated wrapper
//!        ↓
//! handler.call(req)  at request time               ← one vtable dispatch
//!        ↓
//! Box::pin(async { hello(req).await.into_outcome() })  ← BoxFuture
//! ```
//!
//! A handler either produces a [`Response`] or fails with a [`BoxError`].
//! Panics are not part of the contract; the error-catching middleware turns
//! them into failures at the edge of the application.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::message::{Request, Response};
use crate::response::IntoResponse;
use crate::status::Status;

/// Any error a handler may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler produces.
pub type Outcome = Result<Response, BoxError>;

/// A heap-allocated, type-erased future that resolves to an [`Outcome`].
///
/// `Send + 'static` let tokio move the future across threads safely.
pub type BoxFuture = Pin<Box<dyn Future<Output = Outcome> + Send + 'static>>;

// ── Internal types ────────────────────────────────────────────────────────────

trait ErasedHandler: Send + Sync {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
///
/// Cloning is one atomic reference-count increment.
#[derive(Clone)]
pub struct BoxedHandler(Arc<dyn ErasedHandler>);

impl BoxedHandler {
    /// Runs the handler.
    pub fn call(&self, req: Request) -> BoxFuture {
        self.0.call(req)
    }
}

impl std::fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxedHandler")
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` (or closure returning a future) with the signature
///
/// ```text
/// async fn name(req: Request) -> impl IntoOutcome
/// ```
///
/// and for [`BoxedHandler`] itself. The trait is **sealed**.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        BoxedHandler(Arc::new(FnHandler(self)))
    }
}

impl private::Sealed for BoxedHandler {}

impl Handler for BoxedHandler {
    fn into_boxed_handler(self) -> BoxedHandler { self }
}

/// Erases a handler.
pub fn handler(h: impl Handler) -> BoxedHandler {
    h.into_boxed_handler()
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

// ── IntoOutcome ───────────────────────────────────────────────────────────────

/// Conversion of a handler's return value into an [`Outcome`].
///
/// Anything that is [`IntoResponse`] succeeds; a `Result` whose error converts
/// into [`BoxError`] may also fail.
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl<R: IntoResponse, E: Into<BoxError>> IntoOutcome for Result<R, E> {
    fn into_outcome(self) -> Outcome {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

impl<T: IntoResponse> IntoOutcome for T {
    fn into_outcome(self) -> Outcome { Ok(self.into_response()) }
}

// ── Terminal handlers ─────────────────────────────────────────────────────────

/// Responds `404 Not Found`. The usual innermost handler of an application.
pub async fn not_found(_req: Request) -> Response {
    Response::empty(Status::NotFound)
}
