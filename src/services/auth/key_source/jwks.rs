use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, jwk::JwkSet};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::services::auth::key_source::{KeySource, KeySourceError};
use crate::services::cache::CacheClient;

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    jwks_uri: String,
}

/// Remote JWKS key source.
///
/// - `jwks_uri` comes from configuration, or from the issuer's
///   `/.well-known/openid-configuration` document
/// - the raw key set is cached per issuer with a TTL
/// - an unknown `kid` forces a refetch (key rotation), at most once per
///   `min_refresh_interval` per issuer; concurrent misses share that fetch
#[derive(Clone)]
pub struct JwksKeySource<C: CacheClient> {
    http: reqwest::Client,
    cache: C,
    ttl: Duration,
    min_refresh_interval: Duration,
    jwks_uri: Option<Url>,
    // issuer -> last fetched set; the lock also serializes refetches
    fetched: Arc<Mutex<HashMap<String, (Instant, JwkSet)>>>,
}

impl<C: CacheClient> std::fmt::Debug for JwksKeySource<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksKeySource")
            .field("cache", &self.cache.backend_name())
            .field("ttl", &self.ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .field("jwks_uri", &self.jwks_uri)
            .finish()
    }
}

impl<C: CacheClient> JwksKeySource<C> {
    pub fn new(
        http: reqwest::Client,
        cache: C,
        ttl: Duration,
        min_refresh_interval: Duration,
        jwks_uri: Option<Url>,
    ) -> Self {
        Self {
            http,
            cache,
            ttl,
            min_refresh_interval,
            jwks_uri,
            fetched: Arc::default(),
        }
    }

    fn cache_key(issuer: &str) -> String {
        format!("jwks:{issuer}")
    }

    async fn jwks_uri_for(&self, issuer: &str) -> Result<Url, KeySourceError> {
        if let Some(uri) = &self.jwks_uri {
            return Ok(uri.clone());
        }

        let discovery = Url::parse(&format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        ))
        .map_err(|_| KeySourceError::UnknownIssuer(issuer.to_string()))?;

        let metadata: ProviderMetadata = self
            .http
            .get(discovery)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;

        Url::parse(&metadata.jwks_uri)
            .map_err(|e| KeySourceError::Unavailable(format!("invalid jwks_uri: {e}")))
    }

    async fn fetch(&self, issuer: &str) -> Result<JwkSet, KeySourceError> {
        let uri = self.jwks_uri_for(issuer).await?;
        debug!(%issuer, %uri, "fetching jwks");

        let body = self
            .http
            .get(uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(unavailable)?
            .text()
            .await
            .map_err(unavailable)?;

        let jwks: JwkSet = serde_json::from_str(&body)
            .map_err(|e| KeySourceError::Unavailable(format!("invalid jwks document: {e}")))?;

        // A cache failure only costs a refetch next time
        if let Err(err) = self
            .cache
            .set_with_ttl(&Self::cache_key(issuer), &body, self.ttl)
            .await
        {
            warn!(error = %err, backend = self.cache.backend_name(), "jwks cache write failed");
        }

        Ok(jwks)
    }

    async fn cached(&self, issuer: &str) -> Option<JwkSet> {
        match self.cache.get_string(&Self::cache_key(issuer)).await {
            Ok(Some(body)) => serde_json::from_str(&body).ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, backend = self.cache.backend_name(), "jwks cache read failed");
                None
            }
        }
    }

    /// Fetch unless this issuer was fetched within `min_refresh_interval`,
    /// in which case the set from that fetch is reused.
    async fn refresh(&self, issuer: &str, kid: Option<&str>) -> Result<DecodingKey, KeySourceError> {
        let mut fetched = self.fetched.lock().await;

        if let Some((_, jwks)) = fetched
            .get(issuer)
            .filter(|(at, _)| at.elapsed() < self.min_refresh_interval)
        {
            debug!(%issuer, ?kid, "jwks refreshed recently; not refetching");
            return select_key(jwks, kid);
        }

        let jwks = self.fetch(issuer).await?;
        let key = select_key(&jwks, kid);
        fetched.insert(issuer.to_string(), (Instant::now(), jwks));
        key
    }
}

fn unavailable(e: reqwest::Error) -> KeySourceError {
    KeySourceError::Unavailable(e.to_string())
}

fn select_key(jwks: &JwkSet, kid: Option<&str>) -> Result<DecodingKey, KeySourceError> {
    let jwk = match kid {
        Some(kid) => jwks.find(kid),
        // Without a kid only an unambiguous single-key set is usable
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
    .ok_or_else(|| KeySourceError::UnknownKey(kid.map(str::to_string)))?;

    DecodingKey::from_jwk(jwk)
        .map_err(|e| KeySourceError::Unavailable(format!("unusable jwk: {e}")))
}

#[async_trait]
impl<C: CacheClient> KeySource for JwksKeySource<C> {
    async fn resolve_key(
        &self,
        issuer: &str,
        kid: Option<&str>,
    ) -> Result<DecodingKey, KeySourceError> {
        if let Some(jwks) = self.cached(issuer).await {
            match select_key(&jwks, kid) {
                Err(KeySourceError::UnknownKey(_)) => {
                    debug!(%issuer, ?kid, "kid not in cached jwks; refreshing");
                }
                other => return other,
            }
        }

        self.refresh(issuer, kid).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use axum::{Json, Router, extract::State, routing::get};
    use serde_json::json;

    use super::*;
    use crate::services::cache::MemoryCache;
    use crate::test_support::{PUBLIC_KEY_X, TEST_KID};

    #[derive(Clone)]
    struct Idp {
        addr: SocketAddr,
        jwks_hits: Arc<AtomicUsize>,
    }

    async fn discovery(State(idp): State<Idp>) -> Json<serde_json::Value> {
        Json(json!({
            "issuer": format!("http://{}", idp.addr),
            "jwks_uri": format!("http://{}/oauth2/jwks", idp.addr),
        }))
    }

    async fn jwks(State(idp): State<Idp>) -> Json<serde_json::Value> {
        idp.jwks_hits.fetch_add(1, Ordering::SeqCst);
        Json(json!({
            "keys": [{ "kty": "OKP", "crv": "Ed25519", "kid": TEST_KID, "x": PUBLIC_KEY_X }]
        }))
    }

    async fn spawn_idp() -> Idp {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let idp = Idp {
            addr: listener.local_addr().unwrap(),
            jwks_hits: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/oauth2/jwks", get(jwks))
            .with_state(idp.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        idp
    }

    fn source_with(min_refresh_interval: Duration, jwks_uri: Option<Url>) -> JwksKeySource<MemoryCache> {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        JwksKeySource::new(
            http,
            MemoryCache::new(),
            Duration::from_secs(300),
            min_refresh_interval,
            jwks_uri,
        )
    }

    fn source(jwks_uri: Option<Url>) -> JwksKeySource<MemoryCache> {
        source_with(Duration::ZERO, jwks_uri)
    }

    #[tokio::test]
    async fn discovers_jwks_and_caches_it() {
        let idp = spawn_idp().await;
        let issuer = format!("http://{}", idp.addr);
        let source = source(None);

        source.resolve_key(&issuer, Some(TEST_KID)).await.unwrap();
        source.resolve_key(&issuer, Some(TEST_KID)).await.unwrap();
        source.resolve_key(&issuer, None).await.unwrap();

        assert_eq!(idp.jwks_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_kid_refreshes_once_then_fails() {
        let idp = spawn_idp().await;
        let issuer = format!("http://{}", idp.addr);
        let source = source(None);

        source.resolve_key(&issuer, Some(TEST_KID)).await.unwrap();
        let err = source.resolve_key(&issuer, Some("rotated")).await.unwrap_err();

        assert!(matches!(err, KeySourceError::UnknownKey(Some(k)) if k == "rotated"));
        assert_eq!(idp.jwks_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_kid_flood_is_bounded_by_refresh_interval() {
        let idp = spawn_idp().await;
        let issuer = format!("http://{}", idp.addr);
        let source = source_with(Duration::from_secs(60), None);

        source.resolve_key(&issuer, Some(TEST_KID)).await.unwrap();
        for i in 0..50 {
            let err = source
                .resolve_key(&issuer, Some(&format!("junk-{i}")))
                .await
                .unwrap_err();
            assert!(matches!(err, KeySourceError::UnknownKey(_)));
        }
        source.resolve_key(&issuer, Some(TEST_KID)).await.unwrap();

        assert_eq!(idp.jwks_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_cold_misses_share_one_fetch() {
        let idp = spawn_idp().await;
        let issuer = format!("http://{}", idp.addr);
        let source = source_with(Duration::from_secs(60), None);

        let calls = (0..20).map(|i| {
            let source = source.clone();
            let issuer = issuer.clone();
            tokio::spawn(async move {
                let kid = if i % 2 == 0 { TEST_KID.to_string() } else { format!("junk-{i}") };
                source.resolve_key(&issuer, Some(&kid)).await.is_ok()
            })
        });
        let mut resolved = 0;
        for call in calls.collect::<Vec<_>>() {
            if call.await.unwrap() {
                resolved += 1;
            }
        }

        assert_eq!(resolved, 10);
        assert_eq!(idp.jwks_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn explicit_jwks_uri_skips_discovery() {
        let idp = spawn_idp().await;
        let uri = Url::parse(&format!("http://{}/oauth2/jwks", idp.addr)).unwrap();
        let source = source(Some(uri));

        source
            .resolve_key("https://issuer.example", Some(TEST_KID))
            .await
            .unwrap();

        assert_eq!(idp.jwks_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_issuer_is_unavailable() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = source(None)
            .resolve_key(&format!("http://{addr}"), Some(TEST_KID))
            .await
            .unwrap_err();

        assert!(matches!(err, KeySourceError::Unavailable(_)));
    }
}
