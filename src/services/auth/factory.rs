/// Factory: build the `AuthPipeline` (verifier + key source + rules) from `Config`.
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Config, KeySourceConfig};
use crate::error::AppError;
use crate::services::auth::{
    AuthPipeline, TokenVerifier, VerifierPolicy,
    key_source::{JwksKeySource, KeySource, StaticKeySource},
};
use crate::services::cache::{CacheClient, MemoryCache, ValkeyClient};

pub async fn build_auth_pipeline(config: &Config) -> Result<Arc<AuthPipeline>, AppError> {
    let key_source = build_key_source(config).await?;

    let verifier = TokenVerifier::new(
        key_source,
        VerifierPolicy {
            trusted_issuers: config.trusted_issuers.clone(),
            audience: config.audience.clone(),
            algorithms: config.algorithms.clone(),
            leeway_seconds: config.leeway_seconds,
            key_resolve_timeout: config.key_resolve_timeout,
        },
    );

    Ok(Arc::new(AuthPipeline::new(verifier, config.policy.clone())))
}

async fn build_key_source(config: &Config) -> Result<Arc<dyn KeySource>, AppError> {
    match &config.key_source {
        KeySourceConfig::StaticPem(pem) => {
            let source = StaticKeySource::from_ed_pem(&config.trusted_issuers, pem).map_err(|e| {
                warn!(error = %e, "failed to load ACCESS_JWT_PUBLIC_KEY_PEM (expected Ed25519 SPKI PEM)");
                AppError::Internal
            })?;
            info!("using static public key for token verification");
            Ok(Arc::new(source))
        }
        KeySourceConfig::Jwks {
            jwks_uri,
            cache_ttl,
            min_refresh_interval,
            valkey_url,
        } => {
            // The verifier bounds each resolution; the client timeout only
            // keeps abandoned fetches from lingering.
            let http = reqwest::Client::builder()
                .timeout(config.key_resolve_timeout)
                .build()
                .map_err(|e| {
                    warn!(error = %e, "failed to build jwks http client");
                    AppError::Internal
                })?;

            match valkey_url {
                Some(url) => {
                    let cache = ValkeyClient::new(url).await.map_err(|e| {
                        warn!(error = %e, "failed to connect jwks cache");
                        AppError::Internal
                    })?;
                    Ok(jwks(http, cache, *cache_ttl, *min_refresh_interval, jwks_uri.clone()))
                }
                None => Ok(jwks(
                    http,
                    MemoryCache::new(),
                    *cache_ttl,
                    *min_refresh_interval,
                    jwks_uri.clone(),
                )),
            }
        }
    }
}

fn jwks<C: CacheClient>(
    http: reqwest::Client,
    cache: C,
    ttl: std::time::Duration,
    min_refresh_interval: std::time::Duration,
    jwks_uri: Option<url::Url>,
) -> Arc<dyn KeySource> {
    info!(
        backend = cache.backend_name(),
        jwks_uri = jwks_uri.as_ref().map(|u| u.as_str()).unwrap_or("<discovery>"),
        ttl_seconds = ttl.as_secs(),
        min_refresh_seconds = min_refresh_interval.as_secs(),
        "using jwks key source"
    );
    Arc::new(JwksKeySource::new(http, cache, ttl, min_refresh_interval, jwks_uri))
}
