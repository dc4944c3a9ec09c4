//! Request router.
//!
//! Routes are tried in the order they were declared and the first one whose
//! method and path both match handles the request. No reordering, no
//! specificity rules: if a `:capture` route is declared before a literal route
//! at the same position, the capture wins.
//!
//! ```rust
//! use arbor::router::{get, post, router, scope};
//! use arbor::{Request, Response, middleware, not_found};
//!
//! async fn echo(req: Request) -> Response {
//!     Response::text(req.crumb("word").to_owned())
//! }
//! async fn ban(_req: Request) -> Response { Response::text("banned") }
//!
//! let app = router([
//!     get("/echo/:word", echo),
//!     scope("/admin", [middleware::trace()], [
//!         post("/ban/:user", ban),
//!     ]),
//! ])
//! .apply(not_found);
//! ```
//!
//! A router is a [`Middleware`]: requests that match no route go to the
//! handler it wraps.
//!
//! # Patterns
//!
//! Patterns are split on `/`. A segment is either literal text, `:name` (any
//! single non-empty segment, bound as a crumb), or `**` in final position
//! (zero or more remaining segments). Segment counts must match exactly
//! unless the pattern ends in `**`, so `/a/` (segments `a` and an empty one)
//! never matches `/a`.
//!
//! Scope prefixes join their routes segment by segment, not as strings. Inside
//! `scope("/admin", ..)` the route `/` has no segments of its own and matches
//! exactly `/admin`; the route `/x/` matches exactly `/admin/x/`.

use std::sync::{Arc, LazyLock};

use crate::handler::{BoxFuture, BoxedHandler, Handler, handler};
use crate::message::Request;
use crate::method::Method;
use crate::middleware::{Middleware, pipeline};
use crate::variable::Local;

/// Crumbs bound so far, outer routers first.
pub(crate) type Crumbs = Vec<(String, String)>;

pub(crate) static CRUMBS: LazyLock<Local<Crumbs>> = LazyLock::new(|| {
    Local::named("crumbs", |crumbs: &Crumbs| {
        crumbs.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ")
    })
});

// ── Route tree ────────────────────────────────────────────────────────────────

/// A route, or a scope of routes. Built once at startup.
pub struct Route(Node);

enum Node {
    Leaf {
        method: Option<Method>,
        pattern: String,
        handler: BoxedHandler,
    },
    Scope {
        prefix: String,
        middlewares: Vec<Middleware>,
        routes: Vec<Route>,
    },
}

/// A route for `method`.
pub fn on(method: Method, pattern: &str, handler: impl Handler) -> Route {
    Route(Node::Leaf {
        method: Some(method),
        pattern: pattern.to_owned(),
        handler: handler.into_boxed_handler(),
    })
}

/// A route that matches every method.
pub fn any(pattern: &str, handler: impl Handler) -> Route {
    Route(Node::Leaf {
        method: None,
        pattern: pattern.to_owned(),
        handler: handler.into_boxed_handler(),
    })
}

macro_rules! method_routes {
    ($($name:ident => $method:ident),+ $(,)?) => {
        $(
            #[doc = concat!("A route for `", stringify!($method), "` requests.")]
            pub fn $name(pattern: &str, handler: impl Handler) -> Route {
                on(Method::$method, pattern, handler)
            }
        )+
    };
}

method_routes! {
    get     => Get,
    post    => Post,
    put     => Put,
    delete  => Delete,
    patch   => Patch,
    head    => Head,
    options => Options,
    trace   => Trace,
    connect => Connect,
}

/// Groups `routes` under `prefix`, wrapping each of their handlers in
/// `middlewares`.
///
/// Scopes nest. A route inside several scopes sees every prefix in order and
/// is wrapped by every scope's middleware, outermost scope first.
pub fn scope(
    prefix: &str,
    middlewares: impl IntoIterator<Item = Middleware>,
    routes: impl IntoIterator<Item = Route>,
) -> Route {
    Route(Node::Scope {
        prefix: prefix.to_owned(),
        middlewares: middlewares.into_iter().collect(),
        routes: routes.into_iter().collect(),
    })
}

// ── Compiled table ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Crumb(String),
    Rest,
}

struct Compiled {
    method: Option<Method>,
    segments: Vec<Segment>,
    handler: BoxedHandler,
}

/// The flattened route table: every scope resolved into full patterns and
/// pre-wrapped handlers.
pub struct Router {
    routes: Vec<Compiled>,
}

struct Matched {
    crumbs: Crumbs,
    /// Number of request segments consumed before a trailing `**`.
    consumed: Option<usize>,
}

impl Router {
    /// Flattens the route tree.
    ///
    /// # Panics
    ///
    /// Panics on a malformed pattern: an empty `:` capture, or `**` anywhere
    /// but at the very end of a route's full pattern.
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Self {
        let mut compiled = Vec::new();
        for route in routes {
            flatten(route, "", &[], &[], &mut compiled);
        }
        Self { routes: compiled }
    }

    pub fn len(&self) -> usize { self.routes.len() }

    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    /// Finds the first matching route and returns its handler together with
    /// the request it should receive.
    fn route(&self, req: Request) -> Result<(BoxedHandler, Request), Request> {
        let segments = split_path(req.path());
        let found = self.routes.iter().find_map(|route| {
            if !method_matches(route.method.as_ref(), req.method()) {
                return None;
            }
            match_segments(&route.segments, &segments).map(|m| (route, m))
        });
        match found {
            Some((route, matched)) => Ok((route.handler.clone(), bind(req, matched))),
            None => Err(req),
        }
    }

    fn dispatch(&self, req: Request, next: &BoxedHandler) -> BoxFuture {
        match self.route(req) {
            Ok((handler, req)) => handler.call(req),
            Err(req) => next.call(req),
        }
    }

    pub fn into_middleware(self) -> Middleware {
        let table = Arc::new(self);
        Middleware::new(move |next| {
            let table = Arc::clone(&table);
            handler(move |req: Request| table.dispatch(req, &next))
        })
    }
}

/// Builds a router middleware from `routes`. See the [module docs](self).
pub fn router(routes: impl IntoIterator<Item = Route>) -> Middleware {
    Router::new(routes).into_middleware()
}

fn flatten(
    route: Route,
    prefix: &str,
    outer: &[Segment],
    wrap: &[Middleware],
    out: &mut Vec<Compiled>,
) {
    match route.0 {
        Node::Leaf { method, pattern, handler } => {
            let full = format!("{prefix}{pattern}");
            let mut segments = outer.to_vec();
            segments.extend(parse(&full, &pattern));
            if let Some(pos) = segments.iter().position(|s| *s == Segment::Rest) {
                assert!(pos + 1 == segments.len(), "invalid route `{full}`: `**` must be the last segment");
            }
            let handler = pipeline(wrap.to_vec()).apply(handler);
            out.push(Compiled { method, segments, handler });
        }
        Node::Scope { prefix: own, middlewares, routes } => {
            let full = format!("{prefix}{own}");
            let mut segments = outer.to_vec();
            segments.extend(parse(&full, &own));
            assert!(
                !segments.contains(&Segment::Rest),
                "invalid scope `{full}`: `**` is only allowed in routes",
            );
            let mut wrap = wrap.to_vec();
            wrap.extend(middlewares);
            for route in routes {
                flatten(route, &full, &segments, &wrap, out);
            }
        }
    }
}

fn parse(full: &str, pattern: &str) -> Vec<Segment> {
    split_path(pattern)
        .into_iter()
        .map(|s| match s {
            "**" => Segment::Rest,
            _ => match s.strip_prefix(':') {
                Some("") => panic!("invalid route `{full}`: `:` capture without a name"),
                Some(name) => Segment::Crumb(name.to_owned()),
                None => Segment::Literal(s.to_owned()),
            },
        })
        .collect()
}

/// `"/"` and `""` have no segments; `"/a/"` is `["a", ""]`.
fn split_path(path: &str) -> Vec<&str> {
    let path = path.strip_prefix('/').unwrap_or(path);
    if path.is_empty() { Vec::new() } else { path.split('/').collect() }
}

fn method_matches(route: Option<&Method>, request: &Method) -> bool {
    route.is_none_or(|m| m == request)
}

fn match_segments(pattern: &[Segment], segments: &[&str]) -> Option<Matched> {
    let mut crumbs = Crumbs::new();
    for (i, seg) in pattern.iter().enumerate() {
        match seg {
            Segment::Rest => return Some(Matched { crumbs, consumed: Some(i) }),
            Segment::Literal(lit) => {
                if segments.get(i) != Some(&lit.as_str()) {
                    return None;
                }
            }
            Segment::Crumb(name) => match segments.get(i) {
                Some(value) if !value.is_empty() => crumbs.push((name.clone(), (*value).to_owned())),
                _ => return None,
            },
        }
    }
    (pattern.len() == segments.len()).then_some(Matched { crumbs, consumed: None })
}

/// Records the crumbs on the request and, after a `**` match, moves the
/// consumed segments from `path` to `prefix`.
fn bind(req: Request, matched: Matched) -> Request {
    let mut req = req;
    if !matched.crumbs.is_empty() {
        let mut crumbs = req.local(&CRUMBS).cloned().unwrap_or_default();
        crumbs.extend(matched.crumbs);
        req = req.with_local(&CRUMBS, crumbs);
    }
    if let Some(consumed) = matched.consumed.filter(|&n| n > 0) {
        let segments = split_path(req.path());
        let prefix = format!("{}/{}", req.prefix(), segments[..consumed].join("/"));
        let path = format!("/{}", segments[consumed..].join("/"));
        req = req.with_prefix_and_path(prefix, path);
    }
    req
}
