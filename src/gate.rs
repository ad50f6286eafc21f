// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Abuse gate: origin allow-listing composed with CAPTCHA verification.
//!
//! A single admission decision for an inbound write request. Every rule
//! must hold; absence of any input fails closed. The gate mutates no
//! persisted state; its one side effect is the outbound CAPTCHA
//! verification call.

use crate::captcha::CaptchaVerifier;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Request admission gate.
pub struct AbuseGate {
    allowed_origins: Vec<String>,
    captcha: Arc<dyn CaptchaVerifier>,
}

impl AbuseGate {
    pub fn new(allowed_origins: Vec<String>, captcha: Arc<dyn CaptchaVerifier>) -> Self {
        Self {
            allowed_origins,
            captcha,
        }
    }

    /// Admission decision for a request.
    ///
    /// Origin must be an exact allow-list member (scheme+host+port, no
    /// path, no wildcards). The referrer is reduced to its authority and
    /// must match exactly too. The CAPTCHA token must be present and the
    /// provider must affirm it.
    pub async fn validate(
        &self,
        origin: Option<&str>,
        referrer: Option<&str>,
        captcha_token: Option<&str>,
        client_ip: Option<&str>,
    ) -> bool {
        let origin = match origin {
            Some(o) if !o.is_empty() => o,
            _ => {
                debug!("request missing Origin header");
                return false;
            }
        };
        let referrer = match referrer {
            Some(r) if !r.is_empty() => r,
            _ => {
                debug!("request missing Referer header");
                return false;
            }
        };

        if !self.allowed_origins.iter().any(|allowed| allowed == origin) {
            debug!(origin, "Origin not in allow-list");
            return false;
        }

        let Some(authority) = referrer_authority(referrer) else {
            debug!(referrer, "Referer not parseable");
            return false;
        };
        if !self.allowed_origins.iter().any(|allowed| *allowed == authority) {
            debug!(%authority, "Referer authority not in allow-list");
            return false;
        }

        let token = match captcha_token {
            Some(t) if !t.trim().is_empty() => t,
            _ => {
                debug!("request missing CAPTCHA token");
                return false;
            }
        };

        self.captcha.verify(token, client_ip).await
    }
}

/// Scheme+host+port of a referrer URL, with path and query stripped.
/// Default ports are omitted, matching how browsers serialize `Origin`.
fn referrer_authority(referrer: &str) -> Option<String> {
    let parsed = Url::parse(referrer).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}://{host}:{port}", parsed.scheme())),
        None => Some(format!("{}://{host}", parsed.scheme())),
    }
}
