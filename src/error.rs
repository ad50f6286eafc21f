// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error taxonomy for the ingress guard.
//!
//! Token failures are kept granular internally so tests can assert on the
//! exact check that tripped, but the HTTP layer collapses all of them to a
//! single "invalid token" answer and collapses all admission denials to a
//! single generic rejection. Callers outside this crate never learn which
//! check failed.

use thiserror::Error;

/// Application error types.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Token could not be parsed into its three delimited fields.
    #[error("token malformed")]
    Malformed,

    /// Token's embedded expiry has passed.
    #[error("token expired")]
    Expired,

    /// Recomputed MAC did not match the one carried by the token.
    #[error("token signature mismatch")]
    BadSignature,

    /// Rate limit or abuse-gate rejection. A normal negative outcome,
    /// not a fault.
    #[error("request denied")]
    Denied,

    /// A collaborator (secret store, counter store, CAPTCHA provider,
    /// email sender) failed or timed out.
    #[error("collaborator unavailable: {0}")]
    Collaborator(String),
}

impl GuardError {
    /// True for any of the token verification failures.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            GuardError::Malformed | GuardError::Expired | GuardError::BadSignature
        )
    }
}

/// Secret store lookup errors.
#[derive(Debug, Error, Clone)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret backend failure: {0}")]
    Backend(String),
}

/// Record store errors.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("row already exists: {partition}/{row}")]
    Conflict { partition: String, row: String },

    #[error("store backend failure: {0}")]
    Backend(String),
}

impl From<SecretError> for GuardError {
    fn from(err: SecretError) -> Self {
        GuardError::Collaborator(err.to_string())
    }
}

impl From<StoreError> for GuardError {
    fn from(err: StoreError) -> Self {
        GuardError::Collaborator(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GuardError>;
