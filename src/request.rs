//! Incoming-only accessors and constructors.

use std::sync::Arc;

use crate::body::Body;
use crate::message::{Incoming, Request, Version};
use crate::method::Method;
use crate::router::CRUMBS;
use crate::session::{SESSION, Session};
use crate::variable::{GLOBALS, Globals, Locals};

impl Request {
    /// A request with no headers and no body, as if sent by `0.0.0.0:0`.
    ///
    /// Useful in tests and for synthesizing internal requests. `target` is the
    /// path (and optional query) exactly as it would appear on the request
    /// line.
    pub fn new(method: Method, target: &str) -> Self {
        Self::create(incoming(method, target, "0.0.0.0:0".to_owned()), Vec::new(), Body::empty())
    }

    /// A request as read off a connection, already bound to the serving
    /// server's global store.
    pub(crate) fn from_transport(
        method: Method,
        target: &str,
        client: String,
        version: Version,
        headers: Vec<(String, String)>,
        body: Body,
        globals: Arc<Globals>,
    ) -> Self {
        let mut locals = Locals::default();
        locals.insert(&GLOBALS, globals);
        Self::create_with(incoming(method, target, client), version, headers, body, locals)
    }

    pub fn method(&self) -> &Method { &self.head().method }

    /// The path and query exactly as sent.
    pub fn target(&self) -> &str { &self.head().target }

    /// The part of the target's path already consumed by enclosing routers.
    /// Empty at the top level.
    pub fn prefix(&self) -> &str { &self.head().prefix }

    /// The target's path with [`prefix`](Self::prefix) removed. Always starts
    /// with `/` and never includes the query.
    pub fn path(&self) -> &str { &self.head().path }

    /// The query string, without the leading `?` or any fragment.
    pub fn query(&self) -> Option<&str> {
        let target = self.target().split('#').next().unwrap_or_default();
        target.split_once('?').map(|(_, q)| q)
    }

    /// Identifies the peer, typically `ip:port`.
    pub fn client(&self) -> &str { &self.head().client }

    pub fn with_method(&self, method: Method) -> Self {
        self.map_head(|h| h.method = method)
    }

    pub fn with_client(&self, client: impl Into<String>) -> Self {
        let client = client.into();
        self.map_head(|h| h.client = client)
    }

    /// Moves the split between prefix and path. `prefix ++ path` must stay the
    /// target's path; this is only called by the router.
    pub(crate) fn with_prefix_and_path(&self, prefix: String, path: String) -> Self {
        self.map_head(|h| {
            h.prefix = prefix;
            h.path = path;
        })
    }

    // ── crumbs ────────────────────────────────────────────────────────────────

    /// The path parameter bound by the matched route.
    ///
    /// For a route `/users/:id`, `req.crumb("id")` on `/users/42` returns `"42"`.
    ///
    /// # Panics
    ///
    /// Panics if no matched route bound `name`. Asking for a crumb the route
    /// does not declare is a bug in the handler, not a property of the request.
    pub fn crumb(&self, name: &str) -> &str {
        match self.try_crumb(name) {
            Some(value) => value,
            None => panic!(
                "crumb `{name}` requested on {} {} but no matched route binds it",
                self.method(),
                self.target(),
            ),
        }
    }

    /// Like [`crumb`](Self::crumb), without the panic.
    pub fn try_crumb(&self, name: &str) -> Option<&str> {
        self.local(&CRUMBS)?
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    // ── session ───────────────────────────────────────────────────────────────

    /// The session attached by the session middleware, if any.
    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.local(&SESSION)
    }

    pub fn with_session(&self, session: Arc<dyn Session>) -> Self {
        self.with_local(&SESSION, session)
    }
}

fn incoming(method: Method, target: &str, client: String) -> Incoming {
    let path = target.split(['?', '#']).next().unwrap_or_default();
    let path = if path.starts_with('/') { path.to_owned() } else { format!("/{path}") };
    Incoming { method, target: target.to_owned(), prefix: String::new(), path, client }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_target_into_path_and_query() {
        let req = Request::new(Method::Get, "/search?q=rust&page=2");
        assert_eq!(req.target(), "/search?q=rust&page=2");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.prefix(), "");
        assert_eq!(req.query(), Some("q=rust&page=2"));
    }

    #[test]
    fn fragment_is_not_part_of_the_query() {
        let req = Request::new(Method::Get, "/docs?page=2#intro");
        assert_eq!(req.path(), "/docs");
        assert_eq!(req.query(), Some("page=2"));

        assert_eq!(Request::new(Method::Get, "/docs#a?b").query(), None);
    }

    #[test]
    fn field_setters_leave_the_original_alone() {
        let req = Request::new(Method::Get, "/");
        let changed = req.with_method(Method::Post).with_client("10.0.0.1:5000");

        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.client(), "0.0.0.0:0");
        assert_eq!(changed.method(), &Method::Post);
        assert_eq!(changed.client(), "10.0.0.1:5000");
    }

    #[test]
    fn missing_crumb_is_none_with_try() {
        assert_eq!(Request::new(Method::Get, "/").try_crumb("id"), None);
    }

    #[test]
    #[should_panic(expected = "crumb `id`")]
    fn missing_crumb_panics() {
        let _ = Request::new(Method::Get, "/").crumb("id");
    }
}
