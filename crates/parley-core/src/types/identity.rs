//! Identities and group roles.

use super::UserId;
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An authenticated user reference.
///
/// Resolved once per connection by the credential verifier and never
/// mutated for the connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// A directory entry with its presence.
///
/// `last_seen` is the time of the most recent online or offline
/// transition; `None` for users that never connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    #[serde(flatten)]
    pub identity: Identity,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Role of a user within a chat group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Admin,
    #[default]
    Member,
}

impl GroupRole {
    /// Admins may delete other members' messages.
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl FromStr for GroupRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            other => Err(ValidationError::UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_role_parse() {
        assert_eq!("admin".parse::<GroupRole>().unwrap(), GroupRole::Admin);
        assert_eq!("member".parse::<GroupRole>().unwrap(), GroupRole::Member);
        assert!("owner".parse::<GroupRole>().is_err());
        assert!(GroupRole::Admin.is_admin());
        assert!(!GroupRole::Member.is_admin());
    }

    #[test]
    fn test_identity_serde() {
        let identity = Identity::new(3, "carol");
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json, serde_json::json!({"id": 3, "name": "carol"}));
    }

    #[test]
    fn test_user_status_serde() {
        use chrono::TimeZone;

        let status = UserStatus {
            identity: Identity::new(3, "carol"),
            online: false,
            last_seen: Utc.timestamp_opt(0, 0).single(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 3,
                "name": "carol",
                "online": false,
                "lastSeen": "1970-01-01T00:00:00Z"
            })
        );

        let never = UserStatus {
            last_seen: None,
            ..status
        };
        assert!(serde_json::to_value(&never).unwrap()["lastSeen"].is_null());
    }
}
