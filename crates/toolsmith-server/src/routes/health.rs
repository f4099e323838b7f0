use axum::{routing::get, Router};

async fn handler() -> &'static str {
    "ok"
}

pub fn routes() -> Router {
    Router::new().route("/health", get(handler))
}
