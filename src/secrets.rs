// SPDX-FileCopyrightText: 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Secret store collaborator.
//!
//! The guard never owns secret material beyond process memory; it looks
//! secrets up by name through this interface. Production deployments plug
//! in a vault-backed reader; the environment reader covers local runs and
//! tests.

use crate::error::SecretError;
use async_trait::async_trait;

/// Key-value secret lookup.
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Fetch a secret by name. A missing secret is an error, never an
    /// empty string.
    async fn get(&self, name: &str) -> Result<String, SecretError>;
}

/// Reads secrets from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretReader;

impl EnvSecretReader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecretReader for EnvSecretReader {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(SecretError::NotFound(name.to_string())),
        }
    }
}
