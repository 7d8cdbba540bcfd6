/*
 * Responsibility
 * - Hand an admitted request (identity headers already rewritten) to the upstream
 * - Upstream failures become 502; the backend response is returned as-is otherwise
 */
use axum::{body::Body, extract::State, http::Request, response::Response};

use crate::{error::AppError, state::AppState};

pub async fn proxy(State(state): State<AppState>, req: Request<Body>) -> Result<Response, AppError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    state.upstream.forward(req).await.map_err(|err| {
        tracing::warn!(error = %err, %method, %path, "upstream dispatch failed");
        AppError::from(err)
    })
}
