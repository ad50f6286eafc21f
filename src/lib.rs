// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Newsletter Ingress Guard
//!
//! Abuse protection for two public write endpoints: a contact form and a
//! newsletter double-opt-in subscription flow. Three cooperating
//! mechanisms do the work:
//!
//! - Stateless signed confirmation tokens that round-trip through an
//!   untrusted client with no server-side session storage
//! - A sliding-window rate limiter over a shared, eventually-consistent
//!   counter store, gating every mutating operation
//! - A Pending/Active/Suppressed subscription state machine that stays
//!   idempotent under retries and replayed confirmation links
//!
//! Plus an abuse gate (origin allow-listing composed with CAPTCHA
//! verification) in front of both endpoints and a retention sweeper that
//! clears expired rate-limit rows off the request path.

pub mod captcha;
pub mod clock;
pub mod config;
pub mod email;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod secrets;
pub mod store;
pub mod subscription;
pub mod sweeper;
pub mod token;

pub use captcha::{CaptchaVerifier, TurnstileVerifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use email::{DevEmailSender, EmailSender, HttpEmailSender, MailIdentity};
pub use error::{GuardError, SecretError, StoreError};
pub use gate::AbuseGate;
pub use limiter::RateLimiter;
pub use secrets::{EnvSecretReader, SecretReader};
pub use store::{MemoryStore, RecordStore, StoredRecord};
pub use subscription::{
    SubscribeOutcome, SubscriptionRecord, SubscriptionService, SubscriptionStatus,
};
pub use sweeper::{RetentionSweeper, SweepReport};
pub use token::TokenCodec;
