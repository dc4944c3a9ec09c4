//! Error records.
//!
//! Every failure the framework sees, wherever it comes from, is described by
//! one [`Error`] and handed to the [`Dispatcher`](crate::Dispatcher) exactly
//! once. Application-level "errors" such as a 404 are ordinary
//! [`Response`] values until they reach the error-catching middleware.

use std::fmt;

use tracing::Level;

use crate::handler::BoxError;
use crate::message::{Request, Response};
use crate::status::Status;

/// What went wrong.
pub enum Condition {
    /// The application answered with a 4xx or 5xx response.
    Response(Response),
    /// A failure known only by its description, typically from a transport.
    Message(String),
    /// A handler failed or panicked.
    Fault(Fault),
}

/// A failed or crashed computation.
#[derive(Debug)]
pub enum Fault {
    /// The handler returned `Err`.
    Rejected(BoxError),
    /// The handler panicked; the payload is already rendered.
    Panicked(String),
}

/// The protocol stage a failure originated in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Layer {
    Tls,
    Http,
    Http2,
    WebSocket,
    App,
}

/// Which side is to blame.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CausedBy {
    Server,
    Client,
}

/// One failure, with everything needed to log it and answer it.
pub struct Error {
    pub condition: Condition,
    pub layer: Layer,
    pub caused_by: CausedBy,
    /// The request being handled, when there is one.
    pub request: Option<Request>,
    /// A response suggested by the failure site. Ignored when `condition` is
    /// itself a response.
    pub response: Option<Response>,
    pub client: Option<String>,
    pub severity: Level,
    /// Whether a diagnostic dump may be shown to the client.
    pub debug: bool,
    /// Whether the connection can still carry a response. False for failures
    /// before or after the HTTP exchange, such as a TLS handshake.
    pub will_send_response: bool,
}

impl Error {
    /// A bare record: no request, no suggested response, not in debug mode,
    /// severity chosen by blame (`WARN` for clients, `ERROR` for the server).
    pub fn new(condition: Condition, layer: Layer, caused_by: CausedBy) -> Self {
        let severity = match caused_by {
            CausedBy::Client => Level::WARN,
            CausedBy::Server => Level::ERROR,
        };
        Self {
            condition,
            layer,
            caused_by,
            request: None,
            response: None,
            client: None,
            severity,
            debug: false,
            will_send_response: true,
        }
    }

    /// The application produced a 4xx/5xx response for `req`.
    pub fn from_response(req: Request, res: Response) -> Self {
        let caused_by = if res.status().is_client_error() { CausedBy::Client } else { CausedBy::Server };
        Self::new(Condition::Response(res), Layer::App, caused_by).with_request(req)
    }

    /// A handler serving `req` failed or panicked.
    pub fn from_fault(req: Request, fault: Fault) -> Self {
        Self::new(Condition::Fault(fault), Layer::App, CausedBy::Server).with_request(req)
    }

    /// A transport-level failure described by `message`.
    pub fn protocol(layer: Layer, caused_by: CausedBy, message: impl Into<String>) -> Self {
        Self::new(Condition::Message(message.into()), layer, caused_by)
    }

    pub fn with_request(mut self, req: Request) -> Self {
        self.client = Some(req.client().to_owned());
        self.request = Some(req);
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_severity(mut self, severity: Level) -> Self {
        self.severity = severity;
        self
    }

    pub fn without_response(mut self) -> Self {
        self.will_send_response = false;
        self
    }

    /// The response the dispatcher would send absent a template: the
    /// condition's own response, else the suggested one, else an empty 400 or
    /// 500 depending on blame.
    pub fn suggested_response(&self) -> Response {
        if let Condition::Response(res) = &self.condition {
            return res.clone();
        }
        if let Some(res) = &self.response {
            return res.clone();
        }
        match self.caused_by {
            CausedBy::Client => Response::empty(Status::BadRequest),
            CausedBy::Server => Response::empty(Status::InternalServerError),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(res) => write!(f, "{}", res.status()),
            Self::Message(message) => f.write_str(message),
            Self::Fault(Fault::Panicked(message)) => write!(f, "panic: {message}"),
            Self::Fault(Fault::Rejected(e)) => {
                write!(f, "{e}")?;
                let mut source = e.source();
                while let Some(cause) = source {
                    write!(f, "\nCaused by: {cause}")?;
                    source = cause.source();
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(res) => f.debug_tuple("Response").field(&res.status()).finish(),
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Fault(fault) => f.debug_tuple("Fault").field(fault).finish(),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("condition", &self.condition)
            .field("layer", &self.layer)
            .field("caused_by", &self.caused_by)
            .field("client", &self.client)
            .field("severity", &self.severity)
            .field("will_send_response", &self.will_send_response)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tls       => "TLS",
            Self::Http      => "HTTP",
            Self::Http2     => "HTTP2",
            Self::WebSocket => "WebSocket",
            Self::App       => "App",
        })
    }
}

impl fmt::Display for CausedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Server => "Server",
            Self::Client => "Client",
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::Method;

    #[test]
    fn default_suggestion_follows_blame() {
        let client = Error::protocol(Layer::Http, CausedBy::Client, "bad header");
        let server = Error::protocol(Layer::Http2, CausedBy::Server, "stream reset");

        assert_eq!(client.suggested_response().status(), Status::BadRequest);
        assert_eq!(server.suggested_response().status(), Status::InternalServerError);
        assert_eq!(client.severity, Level::WARN);
        assert_eq!(server.severity, Level::ERROR);
    }

    #[test]
    fn response_condition_wins_over_suggestion() {
        let req = Request::new(Method::Get, "/");
        let mut error = Error::from_response(req, Response::empty(Status::Gone));
        error.response = Some(Response::empty(Status::Conflict));

        assert_eq!(error.suggested_response().status(), Status::Gone);
        assert_eq!(error.caused_by, CausedBy::Client);
    }

    #[test]
    fn rejected_condition_lists_its_causes() {
        #[derive(Debug, thiserror::Error)]
        #[error("query failed")]
        struct QueryError(#[source] io::Error);

        let inner = io::Error::new(io::ErrorKind::TimedOut, "socket timed out");
        let condition = Condition::Fault(Fault::Rejected(Box::new(QueryError(inner))));

        assert_eq!(condition.to_string(), "query failed\nCaused by: socket timed out");
    }
}
