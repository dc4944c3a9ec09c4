//! The session store contract.
//!
//! arbor ships no session back end. A session middleware loads (or creates)
//! a session for each request and attaches it with
//! [`Request::with_session`](crate::Request::with_session); handlers read it
//! back with [`Request::session`](crate::Request::session).

use std::sync::{Arc, LazyLock};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::handler::BoxError;
use crate::variable::Local;

/// One client's session.
#[async_trait]
pub trait Session: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String) -> Result<(), BoxError>;

    /// Ends the session. Later reads see nothing.
    async fn invalidate(&self) -> Result<(), BoxError>;

    fn id(&self) -> &str;

    fn expires_at(&self) -> SystemTime;
}

pub(crate) static SESSION: LazyLock<Local<Arc<dyn Session>>> =
    LazyLock::new(|| Local::named("session", |s: &Arc<dyn Session>| s.id().to_owned()));

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::middleware::from_fn;
    use crate::{BoxedHandler, Method, Request, Response};

    struct MemorySession {
        id: String,
        values: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl Session for MemorySession {
        async fn get(&self, key: &str) -> Option<String> {
            self.values.lock().expect("lock").get(key).cloned()
        }

        async fn set(&self, key: &str, value: String) -> Result<(), BoxError> {
            self.values.lock().expect("lock").insert(key.to_owned(), value);
            Ok(())
        }

        async fn invalidate(&self) -> Result<(), BoxError> {
            self.values.lock().expect("lock").clear();
            Ok(())
        }

        fn id(&self) -> &str { &self.id }

        fn expires_at(&self) -> SystemTime { SystemTime::UNIX_EPOCH + Duration::from_secs(60) }
    }

    #[tokio::test]
    async fn middleware_attached_session_reaches_the_handler() {
        let store: Arc<dyn Session> = Arc::new(MemorySession {
            id: "s-1".to_owned(),
            values: Mutex::new(HashMap::from([("user".to_owned(), "ann".to_owned())])),
        });

        let attach = from_fn(move |req: Request, next: BoxedHandler| {
            let store = Arc::clone(&store);
            async move { next.call(req.with_session(store)).await }
        });

        let app = attach.apply(|req: Request| async move {
            let session = req.session().expect("session attached");
            let user = session.get("user").await.unwrap_or_default();
            session.invalidate().await?;
            let after = session.get("user").await;
            Ok::<_, BoxError>(Response::text(format!("{} {user} {after:?}", session.id())))
        });

        let res = app.call(Request::new(Method::Get, "/")).await.expect("outcome");
        assert_eq!(res.body_text().await.expect("body"), "s-1 ann None");
    }

    #[test]
    fn requests_start_without_a_session() {
        assert!(Request::new(Method::Get, "/").session().is_none());
    }
}
