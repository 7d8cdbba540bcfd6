//! Routing collaborator: hands admitted requests to the backend.
//!
//! This is a plain pass-through to a single base URL. Method, path, query,
//! body and end-to-end headers are preserved; hop-by-hop headers are not.

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{HeaderMap, Request, header},
    response::Response,
};
use thiserror::Error;
use tracing::debug;
use url::Url;

// Matches the body limit applied in `middleware::http`
const MAX_BUFFERED_BODY: usize = 1024 * 1024;

const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to read request body: {0}")]
    RequestBody(axum::Error),
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, req: Request<Body>) -> Result<Response, UpstreamError>;
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    // Recomputed from the buffered body
    headers.remove(header::CONTENT_LENGTH);
}

#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base: Url,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, base: Url) -> Self {
        Self { client, base }
    }

    /// `base` path + request path, request query.
    fn target(&self, path: &str, query: Option<&str>) -> Url {
        let mut target = self.base.clone();
        let joined = format!("{}{}", self.base.path().trim_end_matches('/'), path);
        target.set_path(&joined);
        target.set_query(query);
        target
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, req: Request<Body>) -> Result<Response, UpstreamError> {
        let (parts, body) = req.into_parts();
        let target = self.target(parts.uri.path(), parts.uri.query());

        let body = body::to_bytes(body, MAX_BUFFERED_BODY)
            .await
            .map_err(UpstreamError::RequestBody)?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        debug!(method = %parts.method, %target, "forwarding to upstream");

        let upstream = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
