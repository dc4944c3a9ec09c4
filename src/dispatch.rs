//! The error dispatcher.
//!
//! One [`Error`] in, at most one [`Response`] out. The dispatcher logs the
//! error, works out what to answer, and hands that answer to a pluggable
//! [`ErrorTemplate`] for rendering. A template that itself fails is a double
//! fault: it is logged under the `arbor::double_fault` target and replaced by
//! a bare response carrying the suggested status.
//!
//! ```rust
//! use arbor::{Dispatcher, Error, Outcome, Response};
//!
//! let dispatcher = Dispatcher::new().template(
//!     |_error: &Error, _dump: Option<&str>, suggested: Response| -> Outcome {
//!         let page = format!("<h1>{}</h1>", suggested.status());
//!         Ok(Response::html(page).with_status(suggested.status()))
//!     },
//! );
//! ```

use std::fmt::{self, Write as _};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::Level;

use crate::error::{Condition, Error, Fault, Layer};
use crate::handler::{BoxedHandler, Outcome};
use crate::message::{Request, Response};
use crate::middleware::{self, Middleware};
use crate::panic::panic_message;
use crate::response::ContentType;
use crate::status::Status;

// ── ErrorTemplate ─────────────────────────────────────────────────────────────

/// Turns an error into the response the client will see.
///
/// `suggested` is the dispatcher's choice of answer; `dump` is the
/// diagnostic text, present only in debug mode. Returning `Err` (or
/// panicking) is a double fault.
///
/// Plain closures with the signature
/// `Fn(&Error, Option<&str>, Response) -> Outcome` are templates too.
#[async_trait]
pub trait ErrorTemplate: Send + Sync + 'static {
    async fn render(&self, error: &Error, dump: Option<&str>, suggested: Response) -> Outcome;
}

#[async_trait]
impl<F> ErrorTemplate for F
where
    F: Fn(&Error, Option<&str>, Response) -> Outcome + Send + Sync + 'static,
{
    async fn render(&self, error: &Error, dump: Option<&str>, suggested: Response) -> Outcome {
        self(error, dump, suggested)
    }
}

/// Sends the suggested response. In debug mode a bodiless response gets the
/// diagnostic dump as its `text/plain` body.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultTemplate;

#[async_trait]
impl ErrorTemplate for DefaultTemplate {
    async fn render(&self, _error: &Error, dump: Option<&str>, suggested: Response) -> Outcome {
        Ok(match dump {
            Some(dump) if !suggested.has_body() => suggested
                .set_header("content-type", ContentType::Text.as_str())
                .with_sized_body(dump.to_owned()),
            _ => suggested,
        })
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Logs errors and renders error responses. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    template: Arc<dyn ErrorTemplate>,
    debug: bool,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self { template: Arc::new(DefaultTemplate), debug: false }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("debug", &self.debug).finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new() -> Self { Self::default() }

    /// Replaces the response renderer.
    pub fn template(mut self, template: impl ErrorTemplate) -> Self {
        self.template = Arc::new(template);
        self
    }

    /// Enables diagnostic dumps for every error, whatever the error's own
    /// `debug` flag says.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Handles one error.
    ///
    /// Returns `None` when the error says no response can be sent, or when a
    /// double fault happens on a connection that cannot carry a fallback.
    pub async fn dispatch(&self, error: Error) -> Option<Response> {
        log_error(&error);

        if !error.will_send_response {
            return None;
        }

        let suggested = error.suggested_response();
        let status = suggested.status();
        let dump = (self.debug || error.debug).then(|| diagnostic_dump(&error));

        let rendered = AssertUnwindSafe(self.template.render(&error, dump.as_deref(), suggested))
            .catch_unwind()
            .await;

        let failure = match rendered {
            Ok(Ok(res)) => return Some(res),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panic: {}", panic_message(&*payload)),
        };

        tracing::error!(
            target: "arbor::double_fault",
            layer = %error.layer,
            caused_by = %error.caused_by,
            original = %error.condition,
            failure = %failure,
            "error template failed"
        );

        match error.layer {
            Layer::WebSocket => None,
            _ => Some(Response::empty(status)),
        }
    }

    /// Middleware that hands every failure of the wrapped handler to this
    /// dispatcher: 4xx/5xx responses, `Err` outcomes and panics.
    ///
    /// Install it outermost; the server does so automatically.
    pub fn catch(&self) -> Middleware {
        let dispatcher = self.clone();
        middleware::from_fn(move |req: Request, next: BoxedHandler| {
            let dispatcher = dispatcher.clone();
            async move {
                let called = panic::catch_unwind(AssertUnwindSafe(|| next.call(req.clone())));
                let outcome = match called {
                    Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                    Err(payload) => Err(payload),
                };

                let error = match outcome {
                    Ok(Ok(res)) if !res.status().is_error() => return res,
                    Ok(Ok(res)) => Error::from_response(req, res),
                    Ok(Err(e)) => Error::from_fault(req, Fault::Rejected(e)),
                    Err(payload) => {
                        let message = panic_message(&*payload);
                        Error::from_fault(req, Fault::Panicked(message))
                    }
                };

                dispatcher
                    .dispatch(error)
                    .await
                    .unwrap_or_else(|| Response::empty(Status::InternalServerError))
            }
        })
    }
}

// ── logging ───────────────────────────────────────────────────────────────────

/// Emits an event at a level only known at run time.
macro_rules! event_at {
    ($level:expr, $($rest:tt)+) => {
        if $level == Level::ERROR {
            tracing::error!($($rest)+)
        } else if $level == Level::WARN {
            tracing::warn!($($rest)+)
        } else if $level == Level::INFO {
            tracing::info!($($rest)+)
        } else if $level == Level::DEBUG {
            tracing::debug!($($rest)+)
        } else {
            tracing::trace!($($rest)+)
        }
    };
}

/// Application error responses are left to the request logger.
fn log_error(error: &Error) {
    if let Condition::Response(res) = &error.condition {
        if res.status().is_error() {
            return;
        }
    }

    let client = error.client.as_deref().unwrap_or("-");
    match &error.request {
        Some(req) => event_at!(
            error.severity,
            layer = %error.layer,
            caused_by = %error.caused_by,
            client,
            method = %req.method(),
            uri = req.target(),
            "{}",
            error.condition
        ),
        None => event_at!(
            error.severity,
            layer = %error.layer,
            caused_by = %error.caused_by,
            client,
            "{}",
            error.condition
        ),
    }
}

// ── diagnostics ───────────────────────────────────────────────────────────────

fn diagnostic_dump(error: &Error) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} error ({} side) at {}", error.layer, error.caused_by, error.severity);
    if let Some(client) = &error.client {
        let _ = writeln!(out, "client: {client}");
    }

    if let Some(req) = &error.request {
        let _ = writeln!(out, "\n{} {} {}", req.method(), req.target(), req.version());
        for (name, value) in req.headers() {
            let _ = writeln!(out, "{name}: {value}");
        }
        let locals = req.locals().describe();
        if !locals.is_empty() {
            let _ = writeln!(out);
            for (label, value) in locals {
                let _ = writeln!(out, "{label} = {value}");
            }
        }
    }

    let _ = writeln!(out, "\n{}", error.condition);
    out
}
