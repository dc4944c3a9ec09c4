//! Request logging.

use std::sync::LazyLock;
use std::time::Instant;

use tracing::{Instrument, info, info_span, warn};

use super::{Middleware, from_fn};
use crate::handler::{BoxError, BoxedHandler};
use crate::message::{Request, Response};
use crate::secret;
use crate::variable::Local;

/// The id [`trace`] assigns to each request. Shown in error dumps.
pub static REQUEST_ID: LazyLock<Local<String>> =
    LazyLock::new(|| Local::named("request_id", String::clone));

pub fn request_id(req: &Request) -> Option<&str> {
    req.local(&REQUEST_ID).map(String::as_str)
}

/// Logs each request and its outcome inside a span carrying the request id.
///
/// Failures are logged and passed on unchanged; turning them into responses
/// is the error dispatcher's job. A request that already has an id (from an
/// outer `trace`) keeps it.
pub fn trace() -> Middleware {
    from_fn(|req: Request, next: BoxedHandler| async move {
        let id = match request_id(&req) {
            Some(id) => id.to_owned(),
            None => secret::to_base64url(&secret::random(6)),
        };
        let req = req.with_local(&REQUEST_ID, id.clone());
        let span = info_span!("request", id = %id);

        async move {
            info!(method = %req.method(), uri = req.target(), client = req.client(), "request");
            let start = Instant::now();
            let outcome: Result<Response, BoxError> = next.call(req).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            match &outcome {
                Ok(res) => info!(status = res.status().code(), elapsed_ms, "response"),
                Err(e) => warn!(error = %e, elapsed_ms, "handler failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    })
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::handler::handler;
    use crate::{Method, Status};

    #[traced_test]
    #[tokio::test]
    async fn assigns_an_id_and_logs_status() {
        let inner = handler(|req: Request| async move {
            let id = request_id(&req).map(str::to_owned).unwrap_or_default();
            Response::text(id)
        });

        let res = trace().apply(inner).call(Request::new(Method::Get, "/x")).await.expect("outcome");

        assert_eq!(res.body_text().await.expect("body").len(), 8);
        assert!(logs_contain("uri=\"/x\""));
        assert!(logs_contain("status=200"));
    }

    #[traced_test]
    #[tokio::test]
    async fn logs_and_propagates_failures() {
        let inner = handler(|_req: Request| async { Err::<Status, _>("boom") });

        let outcome = trace().apply(inner).call(Request::new(Method::Get, "/")).await;

        assert!(outcome.is_err());
        assert!(logs_contain("handler failed"));
    }

    #[tokio::test]
    async fn keeps_an_existing_id() {
        let inner = handler(|req: Request| async move {
            Response::text(request_id(&req).unwrap_or("missing").to_owned())
        });
        let req = Request::new(Method::Get, "/").with_local(&REQUEST_ID, "fixed".to_owned());

        let res = trace().apply(inner).call(req).await.expect("outcome");
        assert_eq!(res.body_text().await.expect("body"), "fixed");
    }
}
