/*
 * Responsibility
 * - Shared context bound to the Router (AppState)
 *   - auth pipeline (verifier + key source + rules), upstream
 * - Clone-cheap (Arc inside); no per-request state lives here
 */
use std::sync::Arc;

use crate::services::{auth::AuthPipeline, upstream::Upstream};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AuthPipeline>,
    pub upstream: Arc<dyn Upstream>,
}

impl AppState {
    pub fn new(pipeline: Arc<AuthPipeline>, upstream: Arc<dyn Upstream>) -> Self {
        Self { pipeline, upstream }
    }
}
