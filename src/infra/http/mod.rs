pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::{ApiError, apply_rate_limit_headers};
pub use state::{AppState, RequestPolicy};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

/// Assemble the public router. Request flow, outermost first: body limit →
/// transport limits → response decoration → identity resolution → logging →
/// blacklist → per-class rate limit → handler. `/healthz` is registered
/// outside the stack.
pub fn build_router(state: AppState) -> Router {
    let create_routes = Router::new()
        .route("/api/secrets", post(handlers::create_secret))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::create_rate_limit,
        ));

    let read_routes = Router::new()
        .route("/api/secrets/{id}", get(handlers::read_secret))
        .route("/api/secrets/{id}/status", get(handlers::validate_secret))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::read_rate_limit,
        ));

    Router::new()
        .merge(create_routes)
        .merge(read_routes)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::reject_banned,
        ))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::resolve_identity,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::decorate_responses,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::transport_limits,
        ))
        .layer(DefaultBodyLimit::max(state.policy.max_body_bytes))
        .route("/healthz", get(handlers::health))
        .with_state(state)
}
