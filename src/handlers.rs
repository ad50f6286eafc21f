// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the ingress guard.
//!
//! Thin glue: headers and the client address are extracted here and the
//! core components operate on plain values. Gate and rate-limit denials
//! share one generic rejection body so a prober cannot tell which check
//! tripped, and every token failure collapses to "invalid token".

use crate::config::Config;
use crate::email::EmailSender;
use crate::error::GuardError;
use crate::gate::AbuseGate;
use crate::limiter::RateLimiter;
use crate::metrics::{self, GuardMetrics};
use crate::subscription::SubscriptionService;
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Header carrying the CAPTCHA challenge-response token.
const CAPTCHA_TOKEN_HEADER: &str = "x-turnstile-token";

/// Contact messages longer than this are rejected before mailing.
const MAX_CONTACT_MESSAGE_CHARS: usize = 4000;

/// Shared application state.
pub struct AppState {
    pub gate: AbuseGate,
    pub limiter: RateLimiter,
    pub subscriptions: SubscriptionService,
    pub emailer: Arc<dyn EmailSender>,
    pub metrics: GuardMetrics,
    pub config: Config,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub email: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "newsletter-ingress-guard",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus exposition endpoint.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// Contact-form submission.
pub async fn contact(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ContactRequest>,
) -> Response {
    let ip = client_ip(&headers, addr);

    if !admit(&state, &headers, &ip).await {
        state
            .metrics
            .record_admission("contact", metrics::OUTCOME_GATE_DENIED);
        return rejected();
    }

    if !is_valid_email(&body.email)
        || body.message.trim().is_empty()
        || body.message.len() >= MAX_CONTACT_MESSAGE_CHARS
    {
        return bad_request("invalid input");
    }

    let bucket = format!("ip:{ip}|contact");
    match state
        .limiter
        .allow(
            &bucket,
            "contact",
            state.config.rate_limit.contact_limit,
            state.config.contact_window(),
        )
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            info!(%ip, "contact attempt over budget");
            state
                .metrics
                .record_admission("contact", metrics::OUTCOME_RATE_DENIED);
            return rejected();
        }
        Err(err) => return server_error("contact", err),
    }

    if let Err(err) = state.emailer.send_contact(&body.email, &body.message).await {
        return server_error("contact", GuardError::Collaborator(err.to_string()));
    }

    state
        .metrics
        .record_admission("contact", metrics::OUTCOME_ALLOWED);
    ok_body()
}

/// Newsletter subscribe: first half of the double opt-in.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<SubscribeRequest>,
) -> Response {
    let ip = client_ip(&headers, addr);

    if !admit(&state, &headers, &ip).await {
        state
            .metrics
            .record_admission("subscribe", metrics::OUTCOME_GATE_DENIED);
        return rejected();
    }

    if !is_valid_email(&body.email) {
        return bad_request("invalid email");
    }

    let bucket = format!("ip:{ip}|subscribe");
    match state
        .limiter
        .allow(
            &bucket,
            "subscribe",
            state.config.rate_limit.subscribe_limit,
            state.config.subscribe_window(),
        )
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            info!(%ip, "subscribe attempt over budget");
            state
                .metrics
                .record_admission("subscribe", metrics::OUTCOME_RATE_DENIED);
            return rejected();
        }
        Err(err) => return server_error("subscribe", err),
    }

    match state.subscriptions.subscribe(&body.email).await {
        Ok(outcome) => {
            debug!(?outcome, "subscribe processed");
            state
                .metrics
                .record_admission("subscribe", metrics::OUTCOME_ALLOWED);
            ok_body()
        }
        Err(err) => server_error("subscribe", err),
    }
}

/// Newsletter confirm: second half of the double opt-in. Reached only
/// with a possession-proof token, so neither gated nor rate limited.
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConfirmParams>,
) -> Response {
    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        return bad_request("missing token");
    };

    match state.subscriptions.confirm(&token).await {
        Ok(_) => Redirect::to("/subscribed").into_response(),
        Err(err) if err.is_token_error() => {
            // one message for all three failure modes; no oracle
            debug!(error = %err, "confirmation token rejected");
            bad_request("invalid token")
        }
        Err(err) => server_error("confirm", err),
    }
}

/// Run the abuse gate against extracted request values.
async fn admit(state: &AppState, headers: &HeaderMap, ip: &str) -> bool {
    state
        .gate
        .validate(
            header_str(headers, "origin"),
            header_str(headers, "referer"),
            header_str(headers, CAPTCHA_TOKEN_HEADER),
            Some(ip),
        )
        .await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Client address: first hop of X-Forwarded-For when present (the guard
/// sits behind a reverse proxy in production), socket peer otherwise.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

/// Minimal structural email check; real validation happens when the
/// confirmation mail either arrives or does not.
fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.is_empty() || email.len() > 254 || email.contains(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn ok_body() -> Response {
    Json(serde_json::json!({ "ok": true })).into_response()
}

/// Generic client-side rejection shared by gate and rate-limit denials.
fn rejected() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse {
            error: "request rejected".to_string(),
            code: "REJECTED",
        }),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: "BAD_REQUEST",
        }),
    )
        .into_response()
}

fn server_error(action: &str, err: GuardError) -> Response {
    error!(action, error = %err, "request failed on a collaborator");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal error".to_string(),
            code: "INTERNAL",
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("  User@Example.COM  "));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign.example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@nodot"));
        assert!(!is_valid_email("user@.example.com"));
        assert!(!is_valid_email("two words@example.com"));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let addr: SocketAddr = "10.0.0.1:9999".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, addr), "203.0.113.7");

        let empty = HeaderMap::new();
        assert_eq!(client_ip(&empty, addr), "10.0.0.1");
    }
}
