use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::handlers::demo;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(demo::run_demo))
        .with_state(state)
}
