/*
 * Responsibility
 * - tracing / panic hook setup
 * - Config → dependencies (auth pipeline, upstream) → Router
 * - Middleware (HTTP-level, security headers)
 * - axum::serve() with graceful shutdown
 */
use std::{panic, process, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::services::{auth::build_auth_pipeline, upstream::HttpUpstream};
use crate::state::AppState;
use crate::{api, middleware};

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,identity_gateway=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Surface panics via tracing so they are not lost with stderr
        tracing::error!(?info, "panic");

        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env().context("loading configuration")?;

    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        "starting gateway in {:?} mode on {} → {}",
        config.app_env,
        config.addr,
        config.upstream_url
    );

    let state = build_state(&config).await?;
    for rule in state.pipeline.policy().rules() {
        tracing::info!(pattern = %rule.pattern, condition = ?rule.condition, "path rule");
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn build_state(config: &Config) -> Result<AppState> {
    let pipeline = build_auth_pipeline(config)
        .await
        .context("building auth pipeline")?;

    let client = reqwest::Client::builder()
        .build()
        .context("building upstream http client")?;
    let upstream = HttpUpstream::new(client, config.upstream_url.clone());

    Ok(AppState::new(pipeline, Arc::new(upstream)))
}

fn build_router(state: AppState) -> Router {
    let router = api::routes(state.clone()).with_state(state);
    let router = middleware::security_headers::apply(router);
    middleware::http::apply(router)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
