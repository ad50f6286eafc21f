// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shared fakes for the integration tests: a fixed-key secret reader, a
//! recording mailer and a scripted CAPTCHA verifier.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use newsletter_ingress_guard::captcha::CaptchaVerifier;
use newsletter_ingress_guard::email::{EmailError, EmailSender};
use newsletter_ingress_guard::error::SecretError;
use newsletter_ingress_guard::secrets::SecretReader;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Secret reader with one fixed signing key under every name.
pub struct FakeSecrets;

#[async_trait]
impl SecretReader for FakeSecrets {
    async fn get(&self, _name: &str) -> Result<String, SecretError> {
        Ok(STANDARD.encode(b"an-integration-test-signing-key!"))
    }
}

/// Email sender that records confirmation URLs instead of delivering.
#[derive(Default)]
pub struct RecordingMailer {
    pub confirmations: Mutex<Vec<(String, String)>>,
    pub contacts: Mutex<Vec<(String, String)>>,
    pub sends: AtomicUsize,
}

impl RecordingMailer {
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn last_confirmation_url(&self) -> Option<String> {
        self.confirmations
            .lock()
            .unwrap()
            .last()
            .map(|(_, url)| url.clone())
    }
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send_confirmation(&self, to: &str, confirm_url: &str) -> Result<(), EmailError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.confirmations
            .lock()
            .unwrap()
            .push((to.to_string(), confirm_url.to_string()));
        Ok(())
    }

    async fn send_contact(&self, from: &str, message: &str) -> Result<(), EmailError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.contacts
            .lock()
            .unwrap()
            .push((from.to_string(), message.to_string()));
        Ok(())
    }
}

/// CAPTCHA verifier with a fixed verdict.
pub struct StaticCaptcha(pub bool);

#[async_trait]
impl CaptchaVerifier for StaticCaptcha {
    async fn verify(&self, _token: &str, _remote_ip: Option<&str>) -> bool {
        self.0
    }
}

/// Extract the token query parameter from a confirmation URL.
pub fn token_from_url(confirm_url: &str) -> String {
    let parsed = url::Url::parse(confirm_url).expect("confirmation URL should parse");
    parsed
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .expect("confirmation URL should carry a token")
}
