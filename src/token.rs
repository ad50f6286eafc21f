// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Signed confirmation token codec.
//!
//! Tokens are compact, URL-safe and self-contained: URL-safe base64 (no
//! padding) over `email|unixExpirySeconds|hexMac`, where the MAC is
//! HMAC-SHA256 over `email|unixExpirySeconds` under the currently active
//! signing key. There is no server-side token record; validity is fully
//! determined by recomputation.
//!
//! The signing key is fetched lazily from the secret collaborator and
//! cached with a 12-hour refresh deadline. Single active key: once the
//! upstream secret rotates and the cache refreshes, tokens signed under
//! the previous key stop verifying.

use crate::clock::Clock;
use crate::error::{GuardError, Result};
use crate::secrets::SecretReader;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Signing key cache lifetime.
const KEY_REFRESH_HOURS: i64 = 12;

/// Hard ceiling on requested token lifetimes.
const MAX_TOKEN_TTL_DAYS: i64 = 2;

/// Encoded tokens longer than this are rejected unexamined.
const MAX_TOKEN_CHARS: usize = 2048;

struct CachedKey {
    bytes: Vec<u8>,
    refresh_at: DateTime<Utc>,
}

/// Issues and verifies signed confirmation tokens.
///
/// The key cache is owned by the codec instance, not process-global, so a
/// test can drive refresh behaviour through an injected clock and secret
/// source. Concurrent refresh is tolerated: racing callers fetch the same
/// current secret and converge.
pub struct TokenCodec {
    secrets: Arc<dyn SecretReader>,
    clock: Arc<dyn Clock>,
    key_secret_name: String,
    key_cache: RwLock<Option<CachedKey>>,
}

impl TokenCodec {
    pub fn new(
        secrets: Arc<dyn SecretReader>,
        clock: Arc<dyn Clock>,
        key_secret_name: impl Into<String>,
    ) -> Self {
        Self {
            secrets,
            clock,
            key_secret_name: key_secret_name.into(),
            key_cache: RwLock::new(None),
        }
    }

    /// Issue a token for `email` expiring after `ttl` (clamped to the
    /// 2-day ceiling). The email is trimmed and lower-cased before
    /// signing.
    pub async fn issue(&self, email: &str, ttl: Duration) -> Result<String> {
        let ttl = if ttl > Duration::days(MAX_TOKEN_TTL_DAYS) {
            Duration::days(MAX_TOKEN_TTL_DAYS)
        } else {
            ttl
        };

        let norm = normalize_email(email);
        let exp = (self.clock.now() + ttl).timestamp();
        let payload = format!("{norm}|{exp}");
        let mac = self.compute_mac(&payload).await?;
        Ok(URL_SAFE_NO_PAD.encode(format!("{payload}|{}", hex::encode(mac))))
    }

    /// Verify a token and return the email it was issued for.
    ///
    /// Checks run in order: length gate, decode, field split, expiry,
    /// signature. The MAC comparison is constant-time.
    pub async fn verify(&self, token: &str) -> Result<String> {
        if token.trim().is_empty() || token.len() > MAX_TOKEN_CHARS {
            return Err(GuardError::Malformed);
        }

        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| GuardError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| GuardError::Malformed)?;

        let parts: Vec<&str> = decoded.split('|').collect();
        if parts.len() != 3 {
            return Err(GuardError::Malformed);
        }

        let exp: i64 = parts[1].parse().map_err(|_| GuardError::Malformed)?;
        if self.clock.now().timestamp() > exp {
            debug!(exp, "token past its embedded expiry");
            return Err(GuardError::Expired);
        }

        let provided = hex::decode(parts[2]).map_err(|_| GuardError::BadSignature)?;
        let payload = format!("{}|{}", parts[0], parts[1]);
        let expected = self.compute_mac(&payload).await?;

        if !bool::from(provided.as_slice().ct_eq(expected.as_slice())) {
            return Err(GuardError::BadSignature);
        }

        Ok(parts[0].to_string())
    }

    async fn compute_mac(&self, payload: &str) -> Result<Vec<u8>> {
        let key = self.key().await?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|_| GuardError::Collaborator("signing key rejected by MAC".to_string()))?;
        mac.update(payload.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Current signing key, refreshed from the secret collaborator when
    /// the cache is empty or past its refresh deadline. Fetch failure is
    /// fatal to the calling operation; there is no fallback key.
    async fn key(&self) -> Result<Vec<u8>> {
        {
            let cache = self.key_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if self.clock.now() < cached.refresh_at {
                    return Ok(cached.bytes.clone());
                }
            }
        }

        let secret = self.secrets.get(&self.key_secret_name).await?;
        let bytes = STANDARD.decode(secret.trim()).map_err(|_| {
            GuardError::Collaborator(format!(
                "secret {} is not valid base64 key material",
                self.key_secret_name
            ))
        })?;

        let refresh_at = self.clock.now() + Duration::hours(KEY_REFRESH_HOURS);
        let mut cache = self.key_cache.write().await;
        *cache = Some(CachedKey {
            bytes: bytes.clone(),
            refresh_at,
        });
        info!(next_refresh = %refresh_at, "reloaded confirmation token key from secret store");
        Ok(bytes)
    }
}

/// Canonical form of a subscriber email: trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::SecretError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSecrets {
        value: Option<String>,
        fetches: AtomicUsize,
    }

    impl FakeSecrets {
        fn with_key(material: &[u8]) -> Self {
            Self {
                value: Some(STANDARD.encode(material)),
                fetches: AtomicUsize::new(0),
            }
        }

        fn missing() -> Self {
            Self {
                value: None,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SecretReader for FakeSecrets {
        async fn get(&self, name: &str) -> std::result::Result<String, SecretError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.value
                .clone()
                .ok_or_else(|| SecretError::NotFound(name.to_string()))
        }
    }

    fn codec_with_clock() -> (TokenCodec, ManualClock, Arc<FakeSecrets>) {
        let clock = ManualClock::new(Utc::now());
        let secrets = Arc::new(FakeSecrets::with_key(b"0123456789abcdef0123456789abcdef"));
        let codec = TokenCodec::new(secrets.clone(), Arc::new(clock.clone()), "confirm-key");
        (codec, clock, secrets)
    }

    #[tokio::test]
    async fn test_round_trip_returns_normalized_email() {
        let (codec, _, _) = codec_with_clock();
        let token = codec.issue("  User@Example.COM ", Duration::hours(24)).await.unwrap();
        let email = codec.verify(&token).await.unwrap();
        assert_eq!(email, "user@example.com");
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (codec, clock, _) = codec_with_clock();
        let token = codec.issue("a@b.example", Duration::seconds(1)).await.unwrap();
        clock.advance(Duration::seconds(2));
        let err = codec.verify(&token).await.unwrap_err();
        assert!(matches!(err, GuardError::Expired));
    }

    #[tokio::test]
    async fn test_ttl_clamped_to_ceiling() {
        let (codec, clock, _) = codec_with_clock();
        let issued_at = clock.now();
        let token = codec.issue("a@b.example", Duration::days(30)).await.unwrap();

        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        let exp: i64 = decoded.split('|').nth(1).unwrap().parse().unwrap();
        assert!(exp <= (issued_at + Duration::days(2)).timestamp());
    }

    #[tokio::test]
    async fn test_tampered_mac_rejected() {
        let (codec, _, _) = codec_with_clock();
        let token = codec.issue("a@b.example", Duration::hours(1)).await.unwrap();

        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        let mut parts: Vec<String> = decoded.split('|').map(String::from).collect();
        let mac = parts[2].clone();
        let flipped = if mac.starts_with('0') { "1" } else { "0" };
        parts[2] = format!("{flipped}{}", &mac[1..]);
        let tampered = URL_SAFE_NO_PAD.encode(parts.join("|"));

        let err = codec.verify(&tampered).await.unwrap_err();
        assert!(matches!(err, GuardError::BadSignature));
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let (codec, _, _) = codec_with_clock();
        let token = codec.issue("a@b.example", Duration::hours(1)).await.unwrap();

        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        let swapped = decoded.replacen("a@b.example", "z@b.example", 1);
        let tampered = URL_SAFE_NO_PAD.encode(swapped);

        let err = codec.verify(&tampered).await.unwrap_err();
        assert!(matches!(err, GuardError::BadSignature));
    }

    #[tokio::test]
    async fn test_malformed_tokens_rejected() {
        let (codec, _, _) = codec_with_clock();

        let two_fields = URL_SAFE_NO_PAD.encode("only|two");
        for bad in ["", "not-base64!!!", two_fields.as_str()] {
            let err = codec.verify(bad).await.unwrap_err();
            assert!(matches!(err, GuardError::Malformed), "input: {bad:?}");
        }

        let bad_exp = URL_SAFE_NO_PAD.encode("a@b.example|not-a-number|abcd");
        assert!(matches!(
            codec.verify(&bad_exp).await.unwrap_err(),
            GuardError::Malformed
        ));
    }

    #[tokio::test]
    async fn test_oversized_token_rejected_before_decode() {
        let (codec, _, _) = codec_with_clock();
        let huge = "A".repeat(MAX_TOKEN_CHARS + 1);
        assert!(matches!(
            codec.verify(&huge).await.unwrap_err(),
            GuardError::Malformed
        ));
    }

    #[tokio::test]
    async fn test_key_cached_until_refresh_deadline() {
        let (codec, clock, secrets) = codec_with_clock();

        codec.issue("a@b.example", Duration::hours(1)).await.unwrap();
        codec.issue("a@b.example", Duration::hours(1)).await.unwrap();
        assert_eq!(secrets.fetches.load(Ordering::SeqCst), 1);

        clock.advance(Duration::hours(13));
        codec.issue("a@b.example", Duration::hours(1)).await.unwrap();
        assert_eq!(secrets.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_key_secret_is_fatal() {
        let clock = ManualClock::new(Utc::now());
        let codec = TokenCodec::new(
            Arc::new(FakeSecrets::missing()),
            Arc::new(clock),
            "confirm-key",
        );
        let err = codec.issue("a@b.example", Duration::hours(1)).await.unwrap_err();
        assert!(matches!(err, GuardError::Collaborator(_)));
    }
}
