// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Subscription lifecycle state machine.
//!
//! A subscriber record moves Pending → Active through a double-opt-in
//! confirmation; Suppressed is permanent under this crate's transitions.
//! Both operations are idempotent under retries and replayed confirmation
//! links: re-subscribing an Active or Suppressed address is a success
//! no-op that sends no mail, and re-confirming an Active record is a
//! harmless overwrite with a refreshed confirmation time.
//!
//! A mail-send failure after the Pending upsert is surfaced to the caller
//! without rolling the upsert back. At-least-once transitions with a
//! possible missed notification beat compensating transactions here; the
//! client can simply re-subscribe.

use crate::clock::Clock;
use crate::email::EmailSender;
use crate::error::{GuardError, Result};
use crate::store::{RecordStore, StoredRecord};
use crate::token::{normalize_email, TokenCodec};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Table holding one row per subscriber.
pub const SUBSCRIPTIONS_TABLE: &str = "Subscriptions";

/// All subscriber rows share one partition; the row key is the email.
const SUBSCRIPTIONS_PARTITION: &str = "sub";

/// Confirmation tokens are minted with this lifetime.
const CONFIRM_TOKEN_TTL_HOURS: i64 = 24;

/// Subscriber lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Suppressed,
}

impl SubscriptionStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Active => "Active",
            Self::Suppressed => "Suppressed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "Active" => Some(Self::Active),
            "Suppressed" => Some(Self::Suppressed),
            _ => None,
        }
    }
}

/// A subscriber record. The normalized email is the sole identity;
/// records are never deleted by this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub email: String,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    fn to_stored(&self) -> StoredRecord {
        let mut record = StoredRecord::new(SUBSCRIPTIONS_PARTITION, self.email.clone())
            .with_field("status", self.status.as_str().into())
            .with_field("created_at", self.created_at.to_rfc3339().into());
        if let Some(confirmed) = self.confirmed_at {
            record = record.with_field("confirmed_at", confirmed.to_rfc3339().into());
        }
        record
    }

    fn from_stored(stored: &StoredRecord) -> Option<Self> {
        let status = SubscriptionStatus::parse(stored.get_str("status")?)?;
        let created_at = DateTime::parse_from_rfc3339(stored.get_str("created_at")?)
            .ok()?
            .with_timezone(&Utc);
        let confirmed_at = stored
            .get_str("confirmed_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        Some(Self {
            email: stored.row.clone(),
            status,
            created_at,
            confirmed_at,
        })
    }
}

/// Outcome of a subscribe attempt. Both variants are client-visible
/// success; the distinction only says whether a confirmation was mailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Record is Pending and a confirmation link went out.
    ConfirmationSent,
    /// Record was already Active or Suppressed; nothing sent.
    Unchanged,
}

/// Drives the Pending/Active/Suppressed lifecycle, consuming the token
/// codec and the email collaborator.
pub struct SubscriptionService {
    store: Arc<dyn RecordStore>,
    codec: Arc<TokenCodec>,
    emailer: Arc<dyn EmailSender>,
    clock: Arc<dyn Clock>,
    public_base_url: String,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        codec: Arc<TokenCodec>,
        emailer: Arc<dyn EmailSender>,
        clock: Arc<dyn Clock>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            codec,
            emailer,
            clock,
            public_base_url: public_base_url.into(),
        }
    }

    /// Begin (or restart) a double-opt-in for `email`.
    pub async fn subscribe(&self, email: &str) -> Result<SubscribeOutcome> {
        let email = normalize_email(email);
        self.store.create_if_absent(SUBSCRIPTIONS_TABLE).await?;

        let existing = self
            .store
            .get(SUBSCRIPTIONS_TABLE, SUBSCRIPTIONS_PARTITION, &email)
            .await?
            .as_ref()
            .and_then(SubscriptionRecord::from_stored);

        if let Some(record) = &existing {
            if matches!(
                record.status,
                SubscriptionStatus::Active | SubscriptionStatus::Suppressed
            ) {
                debug!(email, status = record.status.as_str(), "subscribe no-op");
                return Ok(SubscribeOutcome::Unchanged);
            }
        }

        let record = SubscriptionRecord {
            email: email.clone(),
            status: SubscriptionStatus::Pending,
            created_at: existing
                .as_ref()
                .map(|r| r.created_at)
                .unwrap_or_else(|| self.clock.now()),
            confirmed_at: existing.and_then(|r| r.confirmed_at),
        };
        self.store
            .upsert(SUBSCRIPTIONS_TABLE, record.to_stored())
            .await?;

        let token = self
            .codec
            .issue(&email, Duration::hours(CONFIRM_TOKEN_TTL_HOURS))
            .await?;
        let confirm_url = self.confirm_url(&token);
        self.emailer
            .send_confirmation(&email, &confirm_url)
            .await
            .map_err(|e| {
                warn!(email, error = %e, "confirmation mail failed after state upsert");
                GuardError::Collaborator(e.to_string())
            })?;

        info!(email, "confirmation mail sent");
        Ok(SubscribeOutcome::ConfirmationSent)
    }

    /// Complete a double-opt-in from an emailed token. Returns the
    /// confirmed email. Verification failure leaves every record
    /// untouched.
    pub async fn confirm(&self, token: &str) -> Result<String> {
        let email = self.codec.verify(token).await?;
        self.store.create_if_absent(SUBSCRIPTIONS_TABLE).await?;

        let existing = self
            .store
            .get(SUBSCRIPTIONS_TABLE, SUBSCRIPTIONS_PARTITION, &email)
            .await?
            .as_ref()
            .and_then(SubscriptionRecord::from_stored);

        let now = self.clock.now();
        let record = SubscriptionRecord {
            email: email.clone(),
            status: SubscriptionStatus::Active,
            created_at: existing.map(|r| r.created_at).unwrap_or(now),
            confirmed_at: Some(now),
        };
        self.store
            .upsert(SUBSCRIPTIONS_TABLE, record.to_stored())
            .await?;

        info!(email, "subscription confirmed");
        Ok(email)
    }

    /// Current record for a normalized email, if any.
    pub async fn lookup(&self, email: &str) -> Result<Option<SubscriptionRecord>> {
        let email = normalize_email(email);
        self.store.create_if_absent(SUBSCRIPTIONS_TABLE).await?;
        Ok(self
            .store
            .get(SUBSCRIPTIONS_TABLE, SUBSCRIPTIONS_PARTITION, &email)
            .await?
            .as_ref()
            .and_then(SubscriptionRecord::from_stored))
    }

    fn confirm_url(&self, token: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
        format!(
            "{}/subscribe/confirm?token={encoded}",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::email::EmailError;
    use crate::error::SecretError;
    use crate::secrets::SecretReader;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeSecrets;

    #[async_trait]
    impl SecretReader for FakeSecrets {
        async fn get(&self, _name: &str) -> std::result::Result<String, SecretError> {
            Ok(STANDARD.encode(b"0123456789abcdef0123456789abcdef"))
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        confirmations: Mutex<Vec<(String, String)>>,
        sends: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EmailSender for RecordingMailer {
        async fn send_confirmation(
            &self,
            to: &str,
            confirm_url: &str,
        ) -> std::result::Result<(), EmailError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmailError::SendFailed("provider down".to_string()));
            }
            self.confirmations
                .lock()
                .unwrap()
                .push((to.to_string(), confirm_url.to_string()));
            Ok(())
        }

        async fn send_contact(
            &self,
            _from: &str,
            _message: &str,
        ) -> std::result::Result<(), EmailError> {
            Ok(())
        }
    }

    struct Harness {
        service: SubscriptionService,
        store: Arc<MemoryStore>,
        clock: ManualClock,
        mailer: Arc<RecordingMailer>,
    }

    fn harness() -> Harness {
        harness_with_mailer(RecordingMailer::default())
    }

    fn harness_with_mailer(mailer: RecordingMailer) -> Harness {
        let clock = ManualClock::new(Utc::now());
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::new(clock_arc.clone()));
        let codec = Arc::new(TokenCodec::new(
            Arc::new(FakeSecrets),
            clock_arc.clone(),
            "confirm-key",
        ));
        let mailer = Arc::new(mailer);
        let service = SubscriptionService::new(
            store.clone(),
            codec,
            mailer.clone(),
            clock_arc,
            "https://site.example",
        );
        Harness {
            service,
            store,
            clock,
            mailer,
        }
    }

    fn token_from_url(url: &str) -> String {
        let parsed = url::Url::parse(url).unwrap();
        parsed
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_creates_pending_and_mails_link() {
        let h = harness();
        let outcome = h.service.subscribe("User@Example.com").await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::ConfirmationSent);

        let record = h.service.lookup("user@example.com").await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Pending);
        assert!(record.confirmed_at.is_none());

        let confirmations = h.mailer.confirmations.lock().unwrap();
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations[0].0, "user@example.com");
        assert!(confirmations[0]
            .1
            .starts_with("https://site.example/subscribe/confirm?token="));
    }

    #[tokio::test]
    async fn test_confirm_flips_pending_to_active() {
        let h = harness();
        h.service.subscribe("user@example.com").await.unwrap();
        let url = h.mailer.confirmations.lock().unwrap()[0].1.clone();

        let email = h.service.confirm(&token_from_url(&url)).await.unwrap();
        assert_eq!(email, "user@example.com");

        let record = h.service.lookup(&email).await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert!(record.confirmed_at.is_some());
    }

    #[tokio::test]
    async fn test_subscribe_active_is_idempotent_no_mail() {
        let h = harness();
        h.service.subscribe("user@example.com").await.unwrap();
        let url = h.mailer.confirmations.lock().unwrap()[0].1.clone();
        h.service.confirm(&token_from_url(&url)).await.unwrap();

        let outcome = h.service.subscribe("user@example.com").await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Unchanged);
        let outcome = h.service.subscribe("User@Example.COM").await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Unchanged);

        // only the first subscribe sent mail
        assert_eq!(h.mailer.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_suppressed_is_silent_noop() {
        let h = harness();
        let suppressed = SubscriptionRecord {
            email: "blocked@example.com".to_string(),
            status: SubscriptionStatus::Suppressed,
            created_at: h.clock.now(),
            confirmed_at: None,
        };
        h.store
            .upsert(SUBSCRIPTIONS_TABLE, suppressed.to_stored())
            .await
            .unwrap();

        let outcome = h.service.subscribe("blocked@example.com").await.unwrap();
        assert_eq!(outcome, SubscribeOutcome::Unchanged);
        assert_eq!(h.mailer.sends.load(Ordering::SeqCst), 0);

        let record = h.service.lookup("blocked@example.com").await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Suppressed);
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent() {
        let h = harness();
        h.service.subscribe("user@example.com").await.unwrap();
        let url = h.mailer.confirmations.lock().unwrap()[0].1.clone();
        let token = token_from_url(&url);

        h.service.confirm(&token).await.unwrap();
        let first = h.service.lookup("user@example.com").await.unwrap().unwrap();

        h.clock.advance(Duration::minutes(5));
        h.service.confirm(&token).await.unwrap();
        let second = h.service.lookup("user@example.com").await.unwrap().unwrap();

        assert_eq!(second.status, SubscriptionStatus::Active);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.confirmed_at > first.confirmed_at);
    }

    #[tokio::test]
    async fn test_resubscribe_pending_preserves_created_at() {
        let h = harness();
        h.service.subscribe("user@example.com").await.unwrap();
        let first = h.service.lookup("user@example.com").await.unwrap().unwrap();

        h.clock.advance(Duration::hours(1));
        h.service.subscribe("user@example.com").await.unwrap();
        let second = h.service.lookup("user@example.com").await.unwrap().unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(h.mailer.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mail_failure_surfaces_but_keeps_pending_state() {
        let h = harness_with_mailer(RecordingMailer {
            fail: true,
            ..Default::default()
        });

        let err = h.service.subscribe("user@example.com").await.unwrap_err();
        assert!(matches!(err, GuardError::Collaborator(_)));

        // the upsert is not rolled back; a retry can re-subscribe
        let record = h.service.lookup("user@example.com").await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Pending);
    }

    #[tokio::test]
    async fn test_confirm_rejects_bad_token_without_touching_state() {
        let h = harness();
        let err = h.service.confirm("garbage-token").await.unwrap_err();
        assert!(err.is_token_error());
        assert!(h
            .store
            .get(SUBSCRIPTIONS_TABLE, SUBSCRIPTIONS_PARTITION, "garbage-token")
            .await
            .unwrap()
            .is_none());
    }
}
