// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the ingress guard.
//!
//! Defaults reflect the reference policy: 2 contact messages per 10
//! minutes, 1 subscribe per day, 60-minute rate-limit row retention.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the ingress guard service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Public base URL embedded in confirmation links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Exact origins (scheme+host+port) allowed to post
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Mail identity and destination
    #[serde(default)]
    pub mail: MailConfig,

    /// Names of secrets resolved through the secret reader
    #[serde(default)]
    pub secrets: SecretNames,

    /// CAPTCHA provider endpoint
    #[serde(default)]
    pub captcha: CaptchaConfig,

    /// Rate limiting policy
    #[serde(default)]
    pub rate_limit: RatePolicyConfig,

    /// Retention policy for rate-limit rows
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Mail identity, destination and provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Sender address on outbound mail
    #[serde(default)]
    pub from: String,

    /// Display name on outbound mail
    #[serde(default)]
    pub from_name: String,

    /// Destination for contact-form messages
    #[serde(default)]
    pub contact_to: String,

    /// Mail provider send endpoint
    #[serde(default = "default_mail_api_url")]
    pub api_url: String,

    /// Log mail instead of delivering it (default: false)
    #[serde(default)]
    pub dev_mode: bool,
}

/// Secret names looked up through the secret reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretNames {
    /// Confirmation token signing key (base64 key material)
    #[serde(default = "default_confirm_key_name")]
    pub confirm_key: String,

    /// CAPTCHA provider secret
    #[serde(default = "default_captcha_secret_name")]
    pub captcha: String,

    /// Mail provider API key
    #[serde(default = "default_mail_key_name")]
    pub mail_api_key: String,
}

/// Per-action admission budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatePolicyConfig {
    /// Contact messages allowed per window per client (default: 2)
    #[serde(default = "default_contact_limit")]
    pub contact_limit: usize,

    /// Contact window in seconds (default: 600)
    #[serde(default = "default_contact_window_secs")]
    pub contact_window_secs: u64,

    /// Subscribe attempts allowed per window per client (default: 1)
    #[serde(default = "default_subscribe_limit")]
    pub subscribe_limit: usize,

    /// Subscribe window in seconds (default: 86400)
    #[serde(default = "default_subscribe_window_secs")]
    pub subscribe_window_secs: u64,
}

/// Rate-limit row retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Rows older than this many minutes are swept (default: 60)
    #[serde(default = "default_purge_cutoff_mins")]
    pub purge_cutoff_mins: i64,

    /// Seconds between sweep passes (default: 600)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

/// CAPTCHA provider verification endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    #[serde(default = "default_siteverify_url")]
    pub siteverify_url: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_mail_api_url() -> String {
    "https://api.sendgrid.com/v3/mail/send".to_string()
}

fn default_confirm_key_name() -> String {
    "CONFIRM_TOKEN_KEY".to_string()
}

fn default_captcha_secret_name() -> String {
    "TURNSTILE_SECRET".to_string()
}

fn default_mail_key_name() -> String {
    "MAIL_API_KEY".to_string()
}

fn default_contact_limit() -> usize {
    2
}

fn default_contact_window_secs() -> u64 {
    600
}

fn default_subscribe_limit() -> usize {
    1
}

fn default_subscribe_window_secs() -> u64 {
    86_400
}

fn default_purge_cutoff_mins() -> i64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_siteverify_url() -> String {
    "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
            allowed_origins: Vec::new(),
            mail: MailConfig::default(),
            secrets: SecretNames::default(),
            captcha: CaptchaConfig::default(),
            rate_limit: RatePolicyConfig::default(),
            retention: RetentionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: String::new(),
            from_name: String::new(),
            contact_to: String::new(),
            api_url: default_mail_api_url(),
            dev_mode: false,
        }
    }
}

impl Default for SecretNames {
    fn default() -> Self {
        Self {
            confirm_key: default_confirm_key_name(),
            captcha: default_captcha_secret_name(),
            mail_api_key: default_mail_key_name(),
        }
    }
}

impl Default for RatePolicyConfig {
    fn default() -> Self {
        Self {
            contact_limit: default_contact_limit(),
            contact_window_secs: default_contact_window_secs(),
            subscribe_limit: default_subscribe_limit(),
            subscribe_window_secs: default_subscribe_window_secs(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            purge_cutoff_mins: default_purge_cutoff_mins(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            siteverify_url: default_siteverify_url(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Semicolon-separated
    /// `ALLOWED_ORIGINS` mirrors how deployments pass the allow-list.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(base) = std::env::var("PUBLIC_BASE_URL") {
            config.public_base_url = base;
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            config.allowed_origins = parse_origins(&origins);
        }
        if let Ok(from) = std::env::var("CONTACT_FROM") {
            config.mail.from = from;
        }
        if let Ok(name) = std::env::var("CONTACT_FROM_NAME") {
            config.mail.from_name = name;
        }
        if let Ok(to) = std::env::var("CONTACT_TO") {
            config.mail.contact_to = to;
        }
        if let Ok(url) = std::env::var("MAIL_API_URL") {
            config.mail.api_url = url;
        }
        config.mail.dev_mode = std::env::var("MAIL_DEV_MODE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if let Ok(mins) = std::env::var("PURGE_CUTOFF_MINS") {
            if let Ok(parsed) = mins.parse() {
                config.retention.purge_cutoff_mins = parsed;
            }
        }

        config
    }

    pub fn contact_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.rate_limit.contact_window_secs as i64)
    }

    pub fn subscribe_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.rate_limit.subscribe_window_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_secs)
    }
}

/// Split a semicolon-separated origin list, dropping empty entries.
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_policy() {
        let config = Config::default();
        assert_eq!(config.rate_limit.contact_limit, 2);
        assert_eq!(config.rate_limit.contact_window_secs, 600);
        assert_eq!(config.rate_limit.subscribe_limit, 1);
        assert_eq!(config.rate_limit.subscribe_window_secs, 86_400);
        assert_eq!(config.retention.purge_cutoff_mins, 60);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_parse_origins_drops_empty_entries() {
        assert_eq!(
            parse_origins("https://a.example;;https://b.example; "),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn test_config_deserializes_with_partial_input() {
        let config: Config = serde_json::from_str(r#"{"allowed_origins":["https://a.example"]}"#)
            .expect("partial config should deserialize");
        assert_eq!(config.allowed_origins, vec!["https://a.example".to_string()]);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
    }
}
