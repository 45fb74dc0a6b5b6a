//! Installation access tokens and the port that issues them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::config::has_pem_markers;
use crate::error::AuthenticationError;

/// Short-lived bearer token scoped to one installation.
///
/// The raw value is only reachable through [`AccessToken::expose`]; `Debug`
/// and logs use [`AccessToken::fingerprint`].
pub struct AccessToken {
    secret: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: SecretString::from(token.into()),
            expires_at,
        }
    }

    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// First 12 hex chars of the SHA-256 of the token.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.expose().as_bytes());
        hex::encode(digest)[..12].to_string()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("fingerprint", &self.fingerprint())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Exchanges an installation identity for an access token.
///
/// One attempt per call, bounded by the implementation's deadline.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn installation_token(&self, installation_id: i64)
        -> Result<AccessToken, AuthenticationError>;
}

pub fn validate_installation_id(installation_id: i64) -> Result<(), AuthenticationError> {
    if installation_id <= 0 {
        return Err(AuthenticationError::InvalidInstallation {
            id: installation_id,
        });
    }
    Ok(())
}

pub fn validate_signing_key(pem: &str) -> Result<(), AuthenticationError> {
    if !has_pem_markers(pem) {
        return Err(AuthenticationError::MalformedKey);
    }
    Ok(())
}
