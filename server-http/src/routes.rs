use crate::handlers;
use crate::state::AppState;
use axum::{extract::DefaultBodyLimit, routing::get, Router};
use shared::config::Config;
use tower_http::trace::TraceLayer;

/// Build and configure the application router
///
/// Every path is a key, so there are no other routes. Paths are not
/// normalised: `/a/` and `/a` are different keys.
pub fn build_router(state: AppState, config: &Config) -> Router {
    Router::new()
        // `/` maps to the empty key
        .route(
            "/",
            get(handlers::empty_path)
                .put(handlers::empty_path)
                .post(handlers::empty_path)
                .delete(handlers::empty_path),
        )
        .route(
            "/{*path}",
            get(handlers::get_value)
                .put(handlers::put_value)
                .post(handlers::post_value)
                .delete(handlers::delete_value),
        )
        // Middleware
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
