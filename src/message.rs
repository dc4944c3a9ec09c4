//! Immutable HTTP messages.
//!
//! [`Request`] and [`Response`] are the two directions of one [`Message`]
//! type. Every setter returns a new message and leaves the receiver as it
//! was, so a middleware can hold on to the request it was given and be sure
//! nothing downstream changes it under its feet.
//!
//! # Derivation chains
//!
//! Each message belongs to a chain that starts at the value the transport (or
//! application) created. [`first`](Message::first) returns that original,
//! [`last`](Message::last) the most recently derived value, from anywhere in
//! the chain:
//!
//! ```rust
//! use arbor::{Method, Request};
//!
//! let original = Request::new(Method::Get, "/");
//! let tagged = original.add_header("x-trace", "1");
//!
//! assert!(original.last().same_as(&tagged));
//! assert!(tagged.first().same_as(&original));
//! assert!(!original.has_header("x-trace"));
//! ```
//!
//! The chain holds the only shared mutable state of a message: a cell naming
//! the latest snapshot. Snapshots themselves never change.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use crate::body::{Body, BodyError};
use crate::method::Method;
use crate::status::Status;
use crate::variable::{Local, Locals};

// ── Version ───────────────────────────────────────────────────────────────────

/// Protocol version as a `(major, minor)` pair.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_1_0: Self = Self { major: 1, minor: 0 };
    pub const HTTP_1_1: Self = Self { major: 1, minor: 1 };
    pub const HTTP_2: Self = Self { major: 2, minor: 0 };
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

// ── Direction ─────────────────────────────────────────────────────────────────

/// Fields only an incoming message has.
#[derive(Clone, Debug)]
pub struct Incoming {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) prefix: String,
    pub(crate) path: String,
    pub(crate) client: String,
}

/// Fields only an outgoing message has.
#[derive(Clone, Debug)]
pub struct Outgoing {
    pub(crate) status: Status,
}

/// Marker for the two message directions. Sealed.
pub trait Direction: private::Sealed + Clone + fmt::Debug + Send + Sync + 'static {}

impl Direction for Incoming {}
impl Direction for Outgoing {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Incoming {}
    impl Sealed for super::Outgoing {}
}

/// An incoming HTTP request.
pub type Request = Message<Incoming>;

/// An outgoing HTTP response.
pub type Response = Message<Outgoing>;

// ── Message ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Snapshot<D> {
    head: D,
    version: Version,
    headers: Vec<(String, String)>,
    body: Arc<Body>,
    locals: Locals,
}

struct Chain<D> {
    first: Arc<Snapshot<D>>,
    last: Mutex<Arc<Snapshot<D>>>,
}

/// An immutable HTTP message. See the [module docs](self).
pub struct Message<D> {
    snapshot: Arc<Snapshot<D>>,
    chain: Arc<Chain<D>>,
}

impl<D> Clone for Message<D> {
    fn clone(&self) -> Self {
        Self { snapshot: Arc::clone(&self.snapshot), chain: Arc::clone(&self.chain) }
    }
}

impl<D: Direction> Message<D> {
    /// Starts a new derivation chain.
    pub(crate) fn create(head: D, headers: Vec<(String, String)>, body: Body) -> Self {
        Self::create_with(head, Version::HTTP_1_1, headers, body, Locals::default())
    }

    pub(crate) fn create_with(
        head: D,
        version: Version,
        headers: Vec<(String, String)>,
        body: Body,
        locals: Locals,
    ) -> Self {
        let snapshot = Arc::new(Snapshot { head, version, headers, body: Arc::new(body), locals });
        let chain = Arc::new(Chain {
            first: Arc::clone(&snapshot),
            last: Mutex::new(Arc::clone(&snapshot)),
        });
        Self { snapshot, chain }
    }

    /// Copies this snapshot, applies `edit`, and records the result as the
    /// latest message in the chain.
    fn derive(&self, edit: impl FnOnce(&mut Snapshot<D>)) -> Self {
        let mut next = Snapshot::clone(&self.snapshot);
        edit(&mut next);
        let next = Arc::new(next);
        *self.chain.last.lock().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&next);
        Self { snapshot: next, chain: Arc::clone(&self.chain) }
    }

    pub(crate) fn head(&self) -> &D { &self.snapshot.head }

    pub(crate) fn map_head(&self, edit: impl FnOnce(&mut D)) -> Self {
        self.derive(|m| edit(&mut m.head))
    }

    // ── derivation ────────────────────────────────────────────────────────────

    /// The message this chain started from.
    pub fn first(&self) -> Self {
        Self { snapshot: Arc::clone(&self.chain.first), chain: Arc::clone(&self.chain) }
    }

    /// The most recently derived message in this chain.
    pub fn last(&self) -> Self {
        let last = Arc::clone(&self.chain.last.lock().unwrap_or_else(PoisonError::into_inner));
        Self { snapshot: last, chain: Arc::clone(&self.chain) }
    }

    /// Whether both values are the very same snapshot.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.snapshot, &other.snapshot)
    }

    // ── version ───────────────────────────────────────────────────────────────

    pub fn version(&self) -> Version { self.snapshot.version }

    pub fn with_version(&self, version: Version) -> Self {
        self.derive(|m| m.version = version)
    }

    // ── headers ───────────────────────────────────────────────────────────────

    /// All headers in the order they were received or added.
    pub fn headers(&self) -> &[(String, String)] { &self.snapshot.headers }

    /// First value of the named header. Names match case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.snapshot.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of the named header, in order.
    pub fn all_headers(&self, name: &str) -> Vec<&str> {
        self.snapshot.headers.iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn has_header(&self, name: &str) -> bool { self.header(name).is_some() }

    /// Appends a header, keeping any existing ones with the same name.
    pub fn add_header(&self, name: &str, value: &str) -> Self {
        let header = (name.to_owned(), value.to_owned());
        self.derive(|m| m.headers.push(header))
    }

    /// Removes every header with the given name.
    pub fn drop_header(&self, name: &str) -> Self {
        self.derive(|m| m.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name)))
    }

    /// Drops every header with the given name, then adds one with `value`.
    pub fn set_header(&self, name: &str, value: &str) -> Self {
        let header = (name.to_owned(), value.to_owned());
        self.derive(|m| {
            m.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            m.headers.push(header);
        })
    }

    // ── body ──────────────────────────────────────────────────────────────────

    /// The full body. A streamed body is read on the first call and
    /// remembered; later calls, from any message sharing the body, return the
    /// same bytes without touching the stream again.
    pub async fn body(&self) -> Result<Bytes, BodyError> {
        self.snapshot.body.read().await
    }

    /// [`body`](Self::body) decoded as UTF-8, replacing invalid sequences.
    pub async fn body_text(&self) -> Result<String, BodyError> {
        let bytes = self.body().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Whether the message has (or may have) a body. A pending stream counts,
    /// even if reading it later yields nothing.
    pub fn has_body(&self) -> bool { self.snapshot.body.is_present() }

    /// Replaces the body. Headers are left alone.
    pub fn with_body(&self, body: impl Into<Bytes>) -> Self {
        let body = Arc::new(Body::full(body.into()));
        self.derive(|m| m.body = body)
    }

    /// Replaces the body and sets `content-length` to match.
    pub fn with_sized_body(&self, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        self.set_header("content-length", &body.len().to_string()).with_body(body)
    }

    // ── variables ─────────────────────────────────────────────────────────────

    /// The value of a local variable, if set on this message.
    pub fn local<T: Send + Sync + 'static>(&self, slot: &Local<T>) -> Option<&T> {
        self.snapshot.locals.get(slot)
    }

    /// A new message with the local variable set (or replaced).
    pub fn with_local<T: Send + Sync + 'static>(&self, slot: &Local<T>, value: T) -> Self {
        self.derive(|m| m.locals.insert(slot, value))
    }

    pub(crate) fn locals(&self) -> &Locals { &self.snapshot.locals }
}

impl<D: Direction> fmt::Debug for Message<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("head", &self.snapshot.head)
            .field("version", &self.snapshot.version)
            .field("headers", &self.snapshot.headers)
            .field("body", &self.snapshot.body)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    fn req() -> Request { Request::new(Method::Get, "/") }

    #[test]
    fn added_header_is_readable_and_droppable() {
        let m = req().add_header("X-Name", "value");
        assert_eq!(m.header("x-name"), Some("value"));

        let dropped = m.drop_header("X-NAME");
        assert!(!dropped.has_header("x-name"));
        assert_eq!(m.header("x-name"), Some("value"));
    }

    #[test]
    fn same_named_headers_keep_their_order_and_case() {
        let m = req().add_header("Accept", "a").add_header("accept", "b");
        assert_eq!(m.all_headers("ACCEPT"), vec!["a", "b"]);
        assert_eq!(m.headers()[0].0, "Accept");
    }

    #[test]
    fn set_header_replaces_every_occurrence() {
        let m = req().add_header("a", "1").add_header("A", "2").set_header("a", "3");
        assert_eq!(m.all_headers("a"), vec!["3"]);
    }

    #[test]
    fn derivation_identity_is_stable_across_the_chain() {
        let m0 = req();
        let m1 = m0.add_header("a", "1");
        let m2 = m1.with_version(Version::HTTP_2);

        for m in [&m0, &m1, &m2] {
            assert!(m.last().first().same_as(&m.first()));
            assert!(m.first().last().same_as(&m.last()));
            assert!(m.first().same_as(&m0));
            assert!(m.last().same_as(&m2));
        }
        assert_eq!(m0.version(), Version::HTTP_1_1);
    }

    #[test]
    fn separate_chains_do_not_share_last() {
        let a = req();
        let b = req();
        let _ = b.add_header("x", "y");
        assert!(a.last().same_as(&a));
    }

    #[tokio::test]
    async fn with_body_round_trips_without_streaming() {
        let m = req().with_body("payload");
        assert!(m.has_body());
        assert_eq!(m.body().await.expect("body"), "payload");
        assert!(!m.has_header("content-length"));
    }

    #[tokio::test]
    async fn sized_body_sets_content_length() {
        let m = req().add_header("Content-Length", "99").with_sized_body("four");
        assert_eq!(m.all_headers("content-length"), vec!["4"]);
        assert_eq!(m.body_text().await.expect("body"), "four");
    }

    #[test]
    fn empty_message_has_no_body() {
        assert!(!req().has_body());
    }
}
