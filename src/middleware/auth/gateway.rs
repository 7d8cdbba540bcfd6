//! Gateway front door: runs the auth pipeline before anything reaches the
//! upstream. Denials terminate here with 401/403.

use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
};
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

/// Gate every route of `router` behind the auth pipeline.
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.layer(middleware::from_fn_with_state(state, gateway_middleware))
}

async fn gateway_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = req.into_parts();

    let admission = state.pipeline.admit(&mut parts).await?;
    debug!(?admission, path = %parts.uri.path(), "request admitted");

    Ok(next.run(Request::from_parts(parts, body)).await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        Json,
        http::{StatusCode, header},
        response::IntoResponse,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::services::upstream::{Upstream, UpstreamError};
    use crate::test_support::{ISSUER, mint, now, pipeline};

    struct Unused;

    #[async_trait]
    impl Upstream for Unused {
        async fn forward(&self, _req: Request<Body>) -> Result<Response, UpstreamError> {
            Ok(StatusCode::NOT_IMPLEMENTED.into_response())
        }
    }

    async fn whoami(req: Request<Body>) -> Json<Value> {
        let h = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
        Json(json!({
            "id": h("x-user-id"),
            "roles": h("x-user-roles"),
            "scopes": h("x-user-scopes"),
        }))
    }

    fn app() -> Router {
        let state = AppState::new(Arc::new(pipeline()), Arc::new(Unused));
        apply(Router::new().fallback(whoami), state.clone()).with_state(state)
    }

    async fn call(path: &str, token: Option<&str>) -> (StatusCode, Option<Value>) {
        let mut req = Request::builder()
            .uri(path)
            .header("x-user-id", "spoofed")
            .header("x-user-roles", "ROLE_ADMIN");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }

        let res = app().oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).ok())
    }

    #[tokio::test]
    async fn public_path_passes_without_identity() {
        let (status, body) = call("/auth/public", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.unwrap(),
            json!({ "id": null, "roles": null, "scopes": null })
        );
    }

    #[tokio::test]
    async fn admitted_request_sees_trusted_identity() {
        let t = mint(json!({
            "iss": ISSUER,
            "sub": "admin",
            "exp": now() + 600,
            "roles": ["ROLE_ADMIN"],
            "scope": "read",
        }));

        let (status, body) = call("/api/admin/ops", Some(&t)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.unwrap(),
            json!({ "id": "admin", "roles": "ROLE_ADMIN", "scopes": "READ" })
        );
    }

    #[tokio::test]
    async fn denial_never_reaches_handler() {
        let t = mint(json!({ "iss": ISSUER, "sub": "u", "exp": now() + 600, "scope": "write" }));

        let (status, body) = call("/api/data/x", Some(&t)).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body.unwrap()["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn expired_token_is_401_with_generic_body() {
        let t = mint(json!({ "iss": ISSUER, "sub": "u", "exp": now() - 3600 }));

        let (status, body) = call("/api/anything", Some(&t)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let body = body.unwrap();
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
        assert!(!body.to_string().contains("expired"));
    }
}
