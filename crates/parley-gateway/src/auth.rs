//! Credential verification.
//!
//! The gateway consumes a [`CredentialVerifier`]; it never issues
//! credentials for logins. Two implementations are provided:
//!
//! - [`SignedTokenVerifier`]: bearer tokens of the form
//!   `{userId}.{expiresUnix}.{hex(hmac_sha256(secret, "{userId}.{expiresUnix}"))}`,
//!   resolved against the store's identity directory.
//! - [`StaticTokenVerifier`]: a fixed token table for development and tests.

use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parley_core::{Identity, SecretString, UserId};
use parley_store::{MessageStore, StoreError};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a credential was rejected.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed credential")]
    Malformed,

    #[error("invalid credential signature")]
    BadSignature,

    #[error("credential expired")]
    Expired,

    #[error("unknown credential")]
    Unknown,

    #[error("user {0} no longer exists")]
    UnknownUser(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validates a bearer credential and resolves it to an identity.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Verifies HMAC-signed, expiring bearer tokens.
pub struct SignedTokenVerifier {
    secret: SecretString,
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
}

impl SignedTokenVerifier {
    pub fn new(secret: SecretString, store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret,
            store,
            clock,
        }
    }

    fn mac(&self, payload: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.signing_key())
            .map_err(|_| AuthError::Malformed)?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    /// Produce a token for `user` valid until `expires_at`.
    ///
    /// For trusted issuers sharing the secret.
    pub fn sign(&self, user: UserId, expires_at: DateTime<Utc>) -> Result<String, AuthError> {
        let payload = format!("{}.{}", user, expires_at.timestamp());
        let signature = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!("{}.{}", payload, hex::encode(signature)))
    }
}

#[async_trait]
impl CredentialVerifier for SignedTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let mut parts = credential.trim().splitn(3, '.');
        let (Some(user), Some(expires), Some(signature)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let user_id: UserId = user.parse().map_err(|_| AuthError::Malformed)?;
        let expires: i64 = expires.parse().map_err(|_| AuthError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| AuthError::Malformed)?;

        self.mac(&format!("{}.{}", user, expires))?
            .verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        if expires <= self.clock.now().timestamp() {
            return Err(AuthError::Expired);
        }

        self.store
            .find_user(user_id)
            .await?
            .ok_or(AuthError::UnknownUser(user_id))
    }
}

/// Maps fixed tokens to identities.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token.
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    pub fn insert(&mut self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        self.tokens
            .iter()
            .find(|(token, _)| {
                parley_core::secret::constant_time_eq(token.as_bytes(), credential.as_bytes())
            })
            .map(|(_, identity)| identity.clone())
            .ok_or(AuthError::Unknown)
    }
}
