//! Minimal arbor app: JSON endpoints, an admin scope and a shared counter.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl -H 'x-admin: yes' http://localhost:3000/admin/stats
//!   curl http://localhost:3000/boom

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor::middleware::{self, Middleware};
use arbor::router::{get, post, router, scope};
use arbor::{BoxError, Global, Request, Response, Server, Status, not_found};

static SERVED: LazyLock<Global<AtomicU64>> = LazyLock::new(|| Global::named("served", AtomicU64::default));

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = middleware::pipeline([
        middleware::trace(),
        count(),
        router([
            get("/users/:id", get_user),
            post("/users", create_user),
            get("/boom", boom),
            scope("/admin", [admin_only()], [get("/stats", stats)]),
        ]),
    ])
    .apply(not_found);

    Server::bind("0.0.0.0:3000")
        .debug(std::env::var_os("ARBOR_DEBUG").is_some())
        .serve(app)
        .await
        .expect("server error");
}

fn count() -> Middleware {
    middleware::from_fn(|req, next| async move {
        SERVED.get(&req).fetch_add(1, Ordering::Relaxed);
        next.call(req).await
    })
}

fn admin_only() -> Middleware {
    middleware::from_fn(|req, next| async move {
        if req.header("x-admin") != Some("yes") {
            return Ok(Response::empty(Status::Forbidden));
        }
        next.call(req).await
    })
}

// GET /users/:id
async fn get_user(req: Request) -> Response {
    let id = req.crumb("id");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#))
}

// POST /users
//
// The body is read on demand; parse it with whatever you like.
async fn create_user(req: Request) -> Result<Response, BoxError> {
    if req.body().await?.is_empty() {
        return Ok(Response::empty(Status::BadRequest));
    }
    Ok(Response::builder()
        .status(Status::Created)
        .header("location", "/users/99")
        .json(r#"{"id":"99","name":"new_user"}"#))
}

// GET /admin/stats
async fn stats(req: Request) -> String {
    format!("served {} requests", SERVED.get(&req).load(Ordering::Relaxed))
}

// GET /boom: the error dispatcher turns this into a 500.
async fn boom(_req: Request) -> Response {
    panic!("something broke")
}
