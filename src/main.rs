// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Newsletter Ingress Guard Service
//!
//! Protects a contact form and a newsletter double-opt-in flow against
//! bots, spam, replay and flooding. Every mutating request passes the
//! abuse gate (origin allow-list + CAPTCHA) and a per-client rate
//! budget before it can touch subscriber state or send mail.
//!
//! ## Configuration
//!
//! Loaded from environment variables:
//!
//! - `BIND_ADDR`: server bind address (default: 0.0.0.0:8080)
//! - `PUBLIC_BASE_URL`: base URL for confirmation links
//! - `ALLOWED_ORIGINS`: semicolon-separated exact origins
//! - `CONTACT_FROM` / `CONTACT_FROM_NAME` / `CONTACT_TO`: mail identity
//! - `MAIL_DEV_MODE`: log mail instead of delivering it
//! - `PURGE_CUTOFF_MINS`: rate-limit row retention (default: 60)
//!
//! Secrets (confirmation signing key, CAPTCHA secret, mail API key) are
//! resolved by name through the secret reader.

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsletter_ingress_guard::{
    captcha::TurnstileVerifier,
    clock::{Clock, SystemClock},
    config::Config,
    email::{DevEmailSender, EmailSender, HttpEmailSender, MailIdentity},
    gate::AbuseGate,
    handlers::{confirm, contact, health, metrics_endpoint, subscribe, AppState},
    limiter::RateLimiter,
    metrics::GuardMetrics,
    secrets::EnvSecretReader,
    store::MemoryStore,
    subscription::SubscriptionService,
    sweeper::RetentionSweeper,
    token::TokenCodec,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = Config::from_env();
    if config.allowed_origins.is_empty() {
        warn!("ALLOWED_ORIGINS is empty; every gated request will be denied");
    }
    info!(
        bind_addr = %config.bind_addr,
        allowed_origins = ?config.allowed_origins,
        contact_limit = config.rate_limit.contact_limit,
        subscribe_limit = config.rate_limit.subscribe_limit,
        purge_cutoff_mins = config.retention.purge_cutoff_mins,
        "Starting newsletter ingress guard"
    );

    // Shared collaborators
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let secrets = Arc::new(EnvSecretReader::new());
    let store = Arc::new(MemoryStore::new(clock.clone()));

    // Core components
    let codec = Arc::new(TokenCodec::new(
        secrets.clone(),
        clock.clone(),
        config.secrets.confirm_key.clone(),
    ));
    let captcha = Arc::new(TurnstileVerifier::new(
        secrets.clone(),
        config.secrets.captcha.clone(),
        config.captcha.siteverify_url.clone(),
    ));
    let gate = AbuseGate::new(config.allowed_origins.clone(), captcha);
    let limiter = RateLimiter::new(store.clone(), clock.clone());

    let identity = MailIdentity {
        from: config.mail.from.clone(),
        from_name: config.mail.from_name.clone(),
        contact_to: config.mail.contact_to.clone(),
    };
    let emailer: Arc<dyn EmailSender> = if config.mail.dev_mode {
        info!("mail dev mode: messages will be logged, not delivered");
        Arc::new(DevEmailSender::new(identity))
    } else {
        Arc::new(HttpEmailSender::new(
            secrets.clone(),
            config.secrets.mail_api_key.clone(),
            config.mail.api_url.clone(),
            identity,
        ))
    };

    let subscriptions = SubscriptionService::new(
        store.clone(),
        codec,
        emailer.clone(),
        clock.clone(),
        config.public_base_url.clone(),
    );

    let metrics = GuardMetrics::new()?;

    let state = Arc::new(AppState {
        gate,
        limiter,
        subscriptions,
        emailer,
        metrics: metrics.clone(),
        config: config.clone(),
    });

    // Spawn retention sweeper
    let sweeper = RetentionSweeper::new(store, clock, config.retention.purge_cutoff_mins);
    let sweep_metrics = metrics;
    let sweep_interval = config.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            match sweeper.sweep().await {
                Ok(report) => sweep_metrics.record_sweep(report.deleted, report.failed),
                Err(err) => warn!(error = %err, "retention sweep failed"),
            }
        }
    });

    // Build router
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/contact", post(contact))
        .route("/subscribe", post(subscribe))
        .route("/subscribe/confirm", get(confirm));
    if config.metrics.enabled {
        app = app.route(config.metrics.path.as_str(), get(metrics_endpoint));
    }
    let app = app.layer(TraceLayer::new_for_http()).with_state(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
