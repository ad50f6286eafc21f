// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! CAPTCHA verification collaborator.
//!
//! The verifier is an admission predicate that fails closed: a missing
//! secret, a slow provider, a non-2xx response or a malformed body all
//! read as "not a human". The provider call carries a hard 5-second
//! timeout so a degraded third party can neither stall requests nor open
//! a bypass.

use crate::error::SecretError;
use crate::secrets::SecretReader;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Provider call timeout.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Challenge-token verification.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// True only when the provider affirms the token. `remote_ip` is
    /// forwarded for the provider's own risk scoring.
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> bool;
}

#[derive(Debug, Deserialize)]
struct SiteverifyResponse {
    success: bool,
}

/// Cloudflare Turnstile siteverify client.
pub struct TurnstileVerifier {
    http: reqwest::Client,
    secrets: Arc<dyn SecretReader>,
    secret_name: String,
    verify_url: String,
    secret_cache: RwLock<Option<String>>,
}

impl TurnstileVerifier {
    pub fn new(
        secrets: Arc<dyn SecretReader>,
        secret_name: impl Into<String>,
        verify_url: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(VERIFY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            secrets,
            secret_name: secret_name.into(),
            verify_url: verify_url.into(),
            secret_cache: RwLock::new(None),
        }
    }

    async fn secret(&self) -> Result<String, SecretError> {
        {
            let cache = self.secret_cache.read().await;
            if let Some(secret) = cache.as_ref() {
                return Ok(secret.clone());
            }
        }

        let secret = self.secrets.get(&self.secret_name).await?;
        let mut cache = self.secret_cache.write().await;
        *cache = Some(secret.clone());
        Ok(secret)
    }
}

#[async_trait]
impl CaptchaVerifier for TurnstileVerifier {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> bool {
        if token.trim().is_empty() {
            return false;
        }

        let secret = match self.secret().await {
            Ok(secret) => secret,
            Err(err) => {
                warn!(error = %err, "CAPTCHA secret unavailable, failing closed");
                return false;
            }
        };

        let mut form = vec![("secret", secret.as_str()), ("response", token)];
        if let Some(ip) = remote_ip.filter(|ip| !ip.trim().is_empty()) {
            form.push(("remoteip", ip));
        }

        let response = match self.http.post(&self.verify_url).form(&form).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "CAPTCHA provider unreachable, failing closed");
                return false;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "CAPTCHA provider returned non-success");
            return false;
        }

        match response.json::<SiteverifyResponse>().await {
            Ok(body) => {
                debug!(success = body.success, "CAPTCHA verdict");
                body.success
            }
            Err(err) => {
                warn!(error = %err, "CAPTCHA response body malformed, failing closed");
                false
            }
        }
    }
}
