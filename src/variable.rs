//! Typed variables attached to messages (locals) and to servers (globals).
//!
//! Each [`Local`] or [`Global`] declaration mints a fresh key. Values are
//! stored type-erased and recovered by downcasting with the type fixed at
//! declaration, so any number of unrelated crates can attach data to the same
//! request without a shared registry.
//!
//! ```rust
//! use std::sync::LazyLock;
//! use arbor::{Local, Method, Request};
//!
//! static USER: LazyLock<Local<String>> = LazyLock::new(|| Local::named("user", String::clone));
//!
//! let req = Request::new(Method::Get, "/");
//! let authed = req.with_local(&USER, "alice".to_owned());
//!
//! assert_eq!(req.local(&USER), None);
//! assert_eq!(authed.local(&USER).map(String::as_str), Some("alice"));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, OnceLock, PoisonError};

static NEXT_KEY: AtomicU64 = AtomicU64::new(0);

fn next_key() -> u64 {
    NEXT_KEY.fetch_add(1, Ordering::Relaxed)
}

// ── Local ─────────────────────────────────────────────────────────────────────

/// A per-message variable slot holding values of type `T`.
///
/// Absent on every message until set with
/// [`Message::with_local`](crate::Message::with_local).
pub struct Local<T> {
    key: u64,
    label: Option<&'static str>,
    show: Option<fn(&T) -> String>,
    _type: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Local<T> {
    pub fn new() -> Self {
        Self { key: next_key(), label: None, show: None, _type: PhantomData }
    }

    /// A slot whose values appear in debug output as `label: show(value)`.
    pub fn named(label: &'static str, show: fn(&T) -> String) -> Self {
        Self { key: next_key(), label: Some(label), show: Some(show), _type: PhantomData }
    }
}

impl<T: Send + Sync + 'static> Default for Local<T> {
    fn default() -> Self { Self::new() }
}

impl<T> fmt::Debug for Local<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Local").field("key", &self.key).field("label", &self.label).finish()
    }
}

/// A value together with the slot metadata needed to render it.
trait Stored: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn describe(&self) -> Option<(&'static str, String)>;
}

struct Entry<T> {
    value: T,
    label: Option<&'static str>,
    show: Option<fn(&T) -> String>,
}

impl<T: Send + Sync + 'static> Stored for Entry<T> {
    fn as_any(&self) -> &dyn Any { self }

    fn describe(&self) -> Option<(&'static str, String)> {
        Some((self.label?, (self.show?)(&self.value)))
    }
}

/// The local variables of one message.
#[derive(Clone, Default)]
pub(crate) struct Locals {
    entries: HashMap<u64, Arc<dyn Stored>>,
}

impl Locals {
    pub(crate) fn get<T: Send + Sync + 'static>(&self, slot: &Local<T>) -> Option<&T> {
        self.entries
            .get(&slot.key)?
            .as_any()
            .downcast_ref::<Entry<T>>()
            .map(|e| &e.value)
    }

    pub(crate) fn insert<T: Send + Sync + 'static>(&mut self, slot: &Local<T>, value: T) {
        let entry = Entry { value, label: slot.label, show: slot.show };
        self.entries.insert(slot.key, Arc::new(entry));
    }

    /// `(label, rendered value)` for every labelled variable, sorted by label.
    pub(crate) fn describe(&self) -> Vec<(&'static str, String)> {
        let mut out: Vec<_> = self.entries.values().filter_map(|e| e.describe()).collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }
}

// ── Global ────────────────────────────────────────────────────────────────────

type Erased = Arc<dyn Any + Send + Sync>;

/// A per-server variable, created on first access and shared afterwards.
///
/// This is the place for state that outlives a single request: connection
/// pools, caches, counters. The initializer runs at most once per store even
/// when many requests hit an uninitialized slot at the same moment; the
/// losers block until the winner finishes.
pub struct Global<T> {
    key: u64,
    label: Option<&'static str>,
    init: Arc<dyn Fn() -> T + Send + Sync>,
}

impl<T: Send + Sync + 'static> Global<T> {
    pub fn new(init: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self { key: next_key(), label: None, init: Arc::new(init) }
    }

    pub fn named(label: &'static str, init: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self { label: Some(label), ..Self::new(init) }
    }

    pub fn label(&self) -> Option<&'static str> { self.label }

    /// Value in the store of the server that is handling `req`, or in the
    /// process-wide store when `req` did not come from a server.
    pub fn get(&self, req: &crate::Request) -> Arc<T> {
        match req.local(&GLOBALS) {
            Some(store) => self.get_in(store),
            None => self.get_in(Globals::process()),
        }
    }

    /// Value in a specific store.
    pub fn get_in(&self, store: &Globals) -> Arc<T> {
        let cell = store.cell(self.key);
        let value = cell.get_or_init(|| Arc::new((self.init)()) as Erased);
        Arc::clone(value)
            .downcast::<T>()
            .unwrap_or_else(|_| unreachable!("global slot {} holds a foreign type", self.key))
    }
}

/// Backing store for [`Global`] values.
#[derive(Default)]
pub struct Globals {
    cells: Mutex<HashMap<u64, Arc<OnceLock<Erased>>>>,
}

static PROCESS: LazyLock<Globals> = LazyLock::new(Globals::default);

/// The store a server attaches to every request it handles.
pub(crate) static GLOBALS: LazyLock<Local<Arc<Globals>>> = LazyLock::new(Local::new);

impl Globals {
    pub fn new() -> Self { Self::default() }

    /// The store shared by everything outside a running server.
    pub fn process() -> &'static Globals { &PROCESS }

    fn cell(&self, key: u64) -> Arc<OnceLock<Erased>> {
        // The map lock is only held to find the cell; initialization happens
        // on the cell itself so unrelated slots never wait on each other.
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cells.entry(key).or_default())
    }
}

impl fmt::Debug for Globals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.cells.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("Globals").field("slots", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{Method, Request};

    #[test]
    fn slots_of_different_types_do_not_collide() {
        let count: Local<u32> = Local::new();
        let name: Local<String> = Local::new();
        let mut locals = Locals::default();
        locals.insert(&count, 7);
        locals.insert(&name, "seven".to_owned());

        assert_eq!(locals.get(&count), Some(&7));
        assert_eq!(locals.get(&name).map(String::as_str), Some("seven"));
    }

    #[test]
    fn two_slots_of_the_same_type_are_independent() {
        let a: Local<u32> = Local::new();
        let b: Local<u32> = Local::new();
        let mut locals = Locals::default();
        locals.insert(&a, 1);

        assert_eq!(locals.get(&b), None);
    }

    #[test]
    fn describe_lists_only_labelled_slots() {
        let shown = Local::named("shown", |v: &u32| format!("#{v}"));
        let hidden: Local<u32> = Local::new();
        let mut locals = Locals::default();
        locals.insert(&shown, 3);
        locals.insert(&hidden, 4);

        assert_eq!(locals.describe(), vec![("shown", "#3".to_owned())]);
    }

    #[test]
    fn global_is_memoized_per_store() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slot = Global::new(move || counter.fetch_add(1, Ordering::SeqCst));
        let one = Globals::new();
        let two = Globals::new();

        assert_eq!(*slot.get_in(&one), 0);
        assert_eq!(*slot.get_in(&one), 0);
        assert_eq!(*slot.get_in(&two), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn request_without_server_uses_process_store() {
        let slot = Global::new(|| 42_u8);
        let req = Request::new(Method::Get, "/");

        assert!(Arc::ptr_eq(&slot.get(&req), &slot.get_in(Globals::process())));
    }

    #[test]
    fn request_with_attached_store_uses_it() {
        let slot = Global::new(Vec::<u8>::new);
        let store = Arc::new(Globals::new());
        let req = Request::new(Method::Get, "/").with_local(&GLOBALS, Arc::clone(&store));

        assert!(Arc::ptr_eq(&slot.get(&req), &slot.get_in(&store)));
        assert!(!Arc::ptr_eq(&slot.get(&req), &slot.get_in(Globals::process())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_first_access_runs_initializer_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slot = Arc::new(Global::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            String::from("pool")
        }));
        let store = Arc::new(Globals::new());

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let slot = Arc::clone(&slot);
                let store = Arc::clone(&store);
                tokio::spawn(async move { slot.get_in(&store) })
            })
            .collect();

        let mut values = Vec::new();
        for task in tasks {
            values.push(task.await.expect("task panicked"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }
}
