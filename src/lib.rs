//! # arbor
//!
//! The request-handling core of an HTTP framework: immutable messages, typed
//! per-request and per-server variables, middleware as plain functions, a
//! first-match router, and one place where every failure ends up.
//!
//! ## The model
//!
//! - A **handler** takes a [`Request`] and produces a [`Response`] (or fails).
//! - A **middleware** takes a handler and returns a handler. Compose them with
//!   [`middleware::pipeline`].
//! - A **router** is a middleware: it handles the requests its routes match
//!   and passes the rest to the handler it wraps.
//! - Anything that escapes the application (an `Err`, a panic, a 4xx/5xx
//!   response) is turned into an [`Error`] and handed to the [`Dispatcher`],
//!   which logs it and renders the response.
//!
//! Messages never change. `req.add_header(..)` returns a new request; the
//! original stays as it was and can find its newest descendant with
//! [`Message::last`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use arbor::router::{get, post, router, scope};
//! use arbor::{Request, Response, Server, Status, middleware, not_found};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = middleware::pipeline([
//!         middleware::trace(),
//!         router([
//!             get("/users/:id", get_user),
//!             scope("/admin", [], [post("/users", create_user)]),
//!         ]),
//!     ])
//!     .apply(not_found);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.crumb("id");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn create_user(req: Request) -> Result<Response, arbor::BoxError> {
//!     if req.body().await?.is_empty() {
//!         return Ok(Response::empty(Status::BadRequest));
//!     }
//!     Ok(Response::builder()
//!         .status(Status::Created)
//!         .header("location", "/users/99")
//!         .json(r#"{"id":"99"}"#))
//! }
//! ```

mod body;
mod dispatch;
mod error;
mod handler;
mod message;
mod method;
mod panic;
mod request;
mod response;
mod server;
mod session;
mod status;
mod variable;

pub mod middleware;
pub mod router;
pub mod secret;

pub use body::BodyError;
pub use dispatch::{DefaultTemplate, Dispatcher, ErrorTemplate};
pub use error::{CausedBy, Condition, Error, Fault, Layer};
pub use handler::{BoxError, BoxFuture, BoxedHandler, Handler, IntoOutcome, Outcome, handler, not_found};
pub use message::{Direction, Incoming, Message, Outgoing, Request, Response, Version};
pub use method::Method;
pub use response::{ContentType, IntoResponse, ResponseBuilder};
pub use server::{Config, ConfigError, ServeError, Server};
pub use session::Session;
pub use status::Status;
pub use variable::{Global, Globals, Local};
