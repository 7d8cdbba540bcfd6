/*
 * Responsibility
 * - URL structure of the gateway
 * - /health is local; every other path goes through the auth pipeline to the upstream
 */
use axum::{Router, routing::get};

use crate::api::handlers::{health::health, proxy::proxy};
use crate::middleware;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let gated = middleware::auth::gateway::apply(Router::new().fallback(proxy), state);

    Router::new().route("/health", get(health)).merge(gated)
}
