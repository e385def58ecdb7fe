//! The bearer-token signing secret.
//!
//! Tokens are `user.expiry.hmac` strings signed with a key shared between
//! the gateway and whoever issues tokens. The key lives in the config
//! file or `PARLEY_TOKEN_SECRET` and must never show up in logs, so it is
//! held in a [`SecretString`] that redacts itself and is wiped on drop.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const REDACTED: &str = "<token secret>";

/// HMAC key for bearer tokens, zeroed on drop.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretString {
    key: String,
}

impl SecretString {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Raw key bytes for keying the token MAC.
    pub fn signing_key(&self) -> &[u8] {
        self.key.as_bytes()
    }

    /// An empty secret cannot sign tokens; config validation rejects it.
    pub fn is_empty(&self) -> bool {
        self.key.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(self.signing_key(), other.signing_key())
    }
}

impl Eq for SecretString {}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Written back verbatim so `config init` round-trips.
        self.key.serialize(serializer)
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Compare credentials without leaking where they differ.
///
/// Used for static bearer tokens; signed tokens are checked by the MAC.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_token_secret_never_printed() {
        let mut config = Config::default();
        config.auth.token_secret = Some(SecretString::new("hunter2-signing-key"));

        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"), "{}", debug);
        assert!(debug.contains(REDACTED));
        assert_eq!(
            config.auth.token_secret.as_ref().unwrap().to_string(),
            REDACTED
        );
    }

    #[test]
    fn test_signing_key_is_raw_bytes() {
        let secret = SecretString::from("k3y");
        assert_eq!(secret.signing_key(), b"k3y");
        assert_eq!(secret, SecretString::new(String::from("k3y")));
        assert_ne!(secret, SecretString::new("k3y "));
    }

    #[test]
    fn test_blank_secret_is_empty() {
        assert!(SecretString::default().is_empty());
        assert!(SecretString::new("  ").is_empty());
        assert!(!SecretString::new("k").is_empty());
    }

    #[test]
    fn test_static_token_comparison() {
        assert!(constant_time_eq(b"alice-token", b"alice-token"));
        assert!(!constant_time_eq(b"alice-token", b"alice-tokeN"));
        assert!(!constant_time_eq(b"alice-token", b"alice"));
        assert!(constant_time_eq(b"", b""));
    }
}
