//! HTTP server and graceful shutdown.
//!
//! The server is the transport around an application handler: it accepts
//! connections, turns each hyper request into a [`Request`], runs the
//! application behind the error-catching middleware and writes back whatever
//! comes out.
//!
//! On the shutdown signal the listener is closed and every open connection is
//! told to finish: idle keep-alive connections close at once, busy ones after
//! their current response. Connections still open when the grace period ends
//! are aborted.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::body::Body;
use crate::dispatch::{Dispatcher, ErrorTemplate};
use crate::error::{CausedBy, Error as ErrorRecord, Layer};
use crate::handler::{BoxError, BoxedHandler, Handler};
use crate::message::{Request, Response, Version};
use crate::method::Method;
use crate::variable::Globals;

// ── Config ────────────────────────────────────────────────────────────────────

/// Server settings.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// addr = "0.0.0.0:8080"
/// debug = false
/// grace_period = 10   # seconds
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub addr: SocketAddr,
    /// Send diagnostic dumps in error responses. Never enable in production.
    pub debug: bool,
    #[serde(deserialize_with = "seconds")]
    pub grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            debug: false,
            grace_period: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

fn seconds<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
    u64::deserialize(de).map(Duration::from_secs)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

// ── Server ────────────────────────────────────────────────────────────────────

/// The HTTP server.
pub struct Server {
    config: Config,
    dispatcher: Dispatcher,
    globals: Arc<Globals>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. Everything else keeps its default.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use arbor::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self::new(Config { addr, ..Config::default() })
    }

    pub fn new(config: Config) -> Self {
        let dispatcher = Dispatcher::new().debug(config.debug);
        Self { config, dispatcher, globals: Arc::new(Globals::new()) }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self.dispatcher = self.dispatcher.debug(debug);
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.config.grace_period = grace_period;
        self
    }

    /// Replaces the renderer for error responses.
    pub fn error_template(mut self, template: impl ErrorTemplate) -> Self {
        self.dispatcher = self.dispatcher.template(template);
        self
    }

    /// The store behind every [`Global`](crate::Global) read by requests this
    /// server handles.
    pub fn globals(&self) -> &Arc<Globals> { &self.globals }

    /// Serves `app` until SIGTERM or Ctrl-C, then shuts down gracefully.
    pub async fn serve(self, app: impl Handler) -> Result<(), ServeError> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Serves `app` until `signal` resolves, then shuts down gracefully.
    pub async fn serve_with_shutdown(
        self,
        app: impl Handler,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), ServeError> {
        let addr = self.config.addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;
        self.serve_listener(listener, app, signal).await;
        Ok(())
    }

    pub(crate) async fn serve_listener(
        self,
        listener: TcpListener,
        app: impl Handler,
        signal: impl Future<Output = ()> + Send,
    ) {
        let app = self.dispatcher.catch().apply(app);
        let dispatcher = Arc::new(self.dispatcher);

        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, debug = self.config.debug, "arbor listening"),
            Err(e) => warn!(error = %e, "arbor listening on an unknown address"),
        }

        let builder = ConnBuilder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let mut tasks = JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM stops accepting at once,
                // even with connections queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            let record = ErrorRecord::protocol(Layer::Http, CausedBy::Server, format!("accept failed: {e}"))
                                .without_response();
                            dispatcher.dispatch(record).await;
                            continue;
                        }
                    };

                    let app = app.clone();
                    let globals = Arc::clone(&self.globals);

                    // Called once per request on the connection.
                    let svc = service_fn(move |req: http::Request<hyper::body::Incoming>| {
                        let app = app.clone();
                        let req = request_from_http(req, remote, Arc::clone(&globals));
                        async move { Ok::<_, Infallible>(respond(&app, req).await) }
                    });

                    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), svc).into_owned();
                    let conn = graceful.watch(conn);
                    let dispatcher = Arc::clone(&dispatcher);

                    tasks.spawn(async move {
                        if let Err(e) = conn.await {
                            let record = ErrorRecord::protocol(Layer::Http, CausedBy::Client, format!("connection error: {e}"))
                                .with_client(remote.to_string())
                                .without_response();
                            dispatcher.dispatch(record).await;
                        }
                    });
                }

                // Reap finished connection tasks so the set does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);

        let deadline = tokio::time::Instant::now() + self.config.grace_period;
        let drained = tokio::time::timeout_at(deadline, async {
            graceful.shutdown().await;
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_period_secs = self.config.grace_period.as_secs(),
                aborted = tasks.len(),
                "grace period elapsed, aborting remaining connections"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        info!("arbor stopped");
    }
}

async fn respond(app: &BoxedHandler, req: Request) -> http::Response<Full<Bytes>> {
    match app.call(req).await {
        Ok(res) => into_http(res).await,
        Err(e) => {
            error!(error = %e, "unhandled failure escaped the error middleware");
            internal_error()
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

/// Wraps an incoming `http` request without reading its body.
pub(crate) fn request_from_http<B>(req: http::Request<B>, client: SocketAddr, globals: Arc<Globals>) -> Request
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();

    let target = parts.uri.path_and_query().map_or_else(|| parts.uri.path(), |pq| pq.as_str());
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| (name.as_str().to_owned(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
        .collect();
    let body = Body::streaming(body.map_err(|e| -> BoxError { e.into() }).boxed_unsync());

    Request::from_transport(
        Method::from(&parts.method),
        target,
        client.to_string(),
        version_of(parts.version),
        headers,
        body,
        globals,
    )
}

fn version_of(version: http::Version) -> Version {
    if version == http::Version::HTTP_09 {
        Version { major: 0, minor: 9 }
    } else if version == http::Version::HTTP_10 {
        Version::HTTP_1_0
    } else if version == http::Version::HTTP_2 {
        Version::HTTP_2
    } else if version == http::Version::HTTP_3 {
        Version { major: 3, minor: 0 }
    } else {
        Version::HTTP_1_1
    }
}

/// Materializes the body and builds the `http` response. Anything that
/// cannot be expressed on the wire becomes an empty 500.
pub(crate) async fn into_http(res: Response) -> http::Response<Full<Bytes>> {
    let body = match res.body().await {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "response body failed");
            return internal_error();
        }
    };

    let mut builder = http::Response::builder().status(res.status().code());
    for (name, value) in res.headers() {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Full::new(body)).unwrap_or_else(|e| {
        error!(error = %e, status = res.status().code(), "response not representable");
        internal_error()
    })
}

fn internal_error() -> http::Response<Full<Bytes>> {
    let mut res = http::Response::new(Full::default());
    *res.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
    res
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C). On
/// Windows only Ctrl-C is available. A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::StreamBody;
    use hyper::body::Frame;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use super::*;
    use crate::{Global, Status};

    fn peer() -> SocketAddr { SocketAddr::from(([10, 1, 2, 3], 40000)) }

    #[test]
    fn config_defaults_fill_missing_keys() {
        let config = Config::from_toml("debug = true\ngrace_period = 5").expect("config");
        assert!(config.debug);
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.addr, Config::default().addr);
    }

    #[test]
    fn config_rejects_bad_addresses() {
        let err = Config::from_toml(r#"addr = "not an address""#).expect_err("must fail");
        assert!(err.to_string().starts_with("invalid config"));
    }

    #[tokio::test]
    async fn http_request_becomes_a_streaming_request() {
        let chunks = ["hel", "lo"].map(|c| Ok::<_, Infallible>(Frame::data(Bytes::from_static(c.as_bytes()))));
        let body = StreamBody::new(futures::stream::iter(chunks));
        let http_req = http::Request::builder()
            .method("PATCH")
            .uri("/items/9?dry=1")
            .version(http::Version::HTTP_2)
            .header("X-Tenant", "acme")
            .body(body)
            .expect("request");

        let req = request_from_http(http_req, peer(), Arc::new(Globals::new()));

        assert_eq!(req.method(), &Method::Patch);
        assert_eq!(req.target(), "/items/9?dry=1");
        assert_eq!(req.path(), "/items/9");
        assert_eq!(req.client(), "10.1.2.3:40000");
        assert_eq!(req.version(), Version::HTTP_2);
        assert_eq!(req.header("x-tenant"), Some("acme"));
        assert!(req.has_body());
        assert_eq!(req.body_text().await.expect("body"), "hello");
    }

    #[test]
    fn transported_requests_share_the_server_store() {
        static HITS: std::sync::LazyLock<Global<std::sync::atomic::AtomicUsize>> =
            std::sync::LazyLock::new(|| Global::new(Default::default));

        let globals = Arc::new(Globals::new());
        let make = || {
            let http_req = http::Request::new(Full::new(Bytes::new()));
            request_from_http(http_req, peer(), Arc::clone(&globals))
        };

        let a = HITS.get(&make());
        let b = HITS.get(&make());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &HITS.get(&Request::new(Method::Get, "/"))));
        assert!(Arc::ptr_eq(&a, &HITS.get(&make().first())));
    }

    #[tokio::test]
    async fn response_converts_with_status_and_headers() {
        let res = Response::builder().status(Status::Created).header("location", "/items/9").text("made");

        let http_res = into_http(res).await;
        assert_eq!(http_res.status(), http::StatusCode::CREATED);
        assert_eq!(http_res.headers()["location"], "/items/9");
        assert_eq!(http_res.headers()["content-type"], "text/plain; charset=utf-8");
        let body = http_res.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(body, "made");
    }

    #[tokio::test]
    async fn unrepresentable_response_becomes_500() {
        let res = Response::text("x").add_header("bad header", "v");
        assert_eq!(into_http(res).await.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn serve_returns_once_signalled() {
        let server = Server::new(Config { addr: SocketAddr::from(([127, 0, 0, 1], 0)), ..Config::default() })
            .grace_period(Duration::from_millis(50));

        let served = server.serve_with_shutdown(crate::not_found, async {}).await;
        assert!(served.is_ok());
    }

    async fn read_head(conn: &mut TcpStream) -> String {
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            let n = conn.read(&mut byte).await.expect("read");
            assert_ne!(n, 0, "connection closed mid-response");
            head.push(byte[0]);
        }
        String::from_utf8_lossy(&head).into_owned()
    }

    #[tokio::test]
    async fn idle_keep_alive_connection_closes_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (stop, stopped) = oneshot::channel::<()>();

        let server = Server::new(Config::default())
            .grace_period(Duration::from_secs(30))
            .serve_listener(listener, crate::not_found, async {
                let _ = stopped.await;
            });

        let client = async {
            let mut conn = TcpStream::connect(addr).await.expect("connect");
            conn.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await.expect("write");
            let head = read_head(&mut conn).await;
            assert!(head.starts_with("HTTP/1.1 404"), "{head}");
            stop.send(()).expect("server running");
            conn
        };

        // Far shorter than the grace period: the idle connection must not
        // hold the drain open.
        let ((), mut conn) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(server, client) })
            .await
            .expect("server drained without waiting out the grace period");

        let _ = conn.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").await;
        let mut rest = Vec::new();
        if conn.read_to_end(&mut rest).await.is_ok() {
            assert!(rest.is_empty(), "closed connection answered: {}", String::from_utf8_lossy(&rest));
        }
    }
}
