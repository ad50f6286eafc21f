// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Email sender collaborator.
//!
//! The guard hands finished messages to this interface and never retries;
//! a send failure surfaces to the caller as a server-side error while any
//! prior state mutation stands. The contact message is expected to be
//! sanitized upstream.

use crate::secrets::SecretReader;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Mail API call timeout.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

const CONTACT_SUBJECT: &str = "[Website Contact] New message";
const CONFIRM_SUBJECT: &str = "Confirm newsletter subscription";

/// Email delivery errors.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("mail provider key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("mail send failed: {0}")]
    SendFailed(String),
}

/// Outbound email delivery.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send a double-opt-in confirmation link to a subscriber.
    async fn send_confirmation(&self, to: &str, confirm_url: &str) -> Result<(), EmailError>;

    /// Forward a contact-form message to the site owner. `message` must
    /// already be sanitized.
    async fn send_contact(&self, from: &str, message: &str) -> Result<(), EmailError>;
}

/// Sender identity and contact destination.
#[derive(Debug, Clone)]
pub struct MailIdentity {
    pub from: String,
    pub from_name: String,
    pub contact_to: String,
}

/// Mail-provider HTTP API client. Posts JSON with a bearer key fetched
/// from the secret collaborator and cached for the process lifetime.
pub struct HttpEmailSender {
    http: reqwest::Client,
    secrets: Arc<dyn SecretReader>,
    key_secret_name: String,
    api_url: String,
    identity: MailIdentity,
    key_cache: RwLock<Option<String>>,
}

impl HttpEmailSender {
    pub fn new(
        secrets: Arc<dyn SecretReader>,
        key_secret_name: impl Into<String>,
        api_url: impl Into<String>,
        identity: MailIdentity,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            secrets,
            key_secret_name: key_secret_name.into(),
            api_url: api_url.into(),
            identity,
            key_cache: RwLock::new(None),
        }
    }

    async fn api_key(&self) -> Result<String, EmailError> {
        {
            let cache = self.key_cache.read().await;
            if let Some(key) = cache.as_ref() {
                return Ok(key.clone());
            }
        }

        let key = self
            .secrets
            .get(&self.key_secret_name)
            .await
            .map_err(|e| EmailError::KeyUnavailable(e.to_string()))?;
        let mut cache = self.key_cache.write().await;
        *cache = Some(key.clone());
        Ok(key)
    }

    async fn post_mail(&self, to: &str, subject: &str, text: &str) -> Result<(), EmailError> {
        let key = self.api_key().await?;
        let body = json!({
            "from": { "email": self.identity.from, "name": self.identity.from_name },
            "to": to,
            "subject": subject,
            "text": text,
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmailError::SendFailed(format!(
                "mail provider returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send_confirmation(&self, to: &str, confirm_url: &str) -> Result<(), EmailError> {
        let text = format!(
            "Someone (hopefully you) subscribed you to the newsletter.\n\n\
             Please use this link to confirm your subscription:\n\n{confirm_url}"
        );
        self.post_mail(to, CONFIRM_SUBJECT, &text).await
    }

    async fn send_contact(&self, from: &str, message: &str) -> Result<(), EmailError> {
        let text = format!("From: {from}\n\n{message}");
        self.post_mail(&self.identity.contact_to, CONTACT_SUBJECT, &text)
            .await
    }
}

/// Development sender: logs the would-be mail instead of delivering it.
#[derive(Debug, Clone)]
pub struct DevEmailSender {
    identity: MailIdentity,
}

impl DevEmailSender {
    pub fn new(identity: MailIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl EmailSender for DevEmailSender {
    async fn send_confirmation(&self, to: &str, confirm_url: &str) -> Result<(), EmailError> {
        info!(to, confirm_url, subject = CONFIRM_SUBJECT, "dev mail: confirmation");
        Ok(())
    }

    async fn send_contact(&self, from: &str, message: &str) -> Result<(), EmailError> {
        info!(
            to = %self.identity.contact_to,
            from,
            message_chars = message.len(),
            subject = CONTACT_SUBJECT,
            "dev mail: contact message"
        );
        Ok(())
    }
}
