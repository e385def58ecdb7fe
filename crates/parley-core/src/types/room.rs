//! Room keys.

use super::{GroupId, UserId};
use crate::error::ValidationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Key of a runtime broadcast scope.
///
/// A pair key always stores the smaller user id first, so
/// `RoomKey::pair(a, b) == RoomKey::pair(b, a)` for every `a`, `b`.
/// The inner representation is private; the only way to build a pair key
/// is through [`RoomKey::pair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey(Scope);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Scope {
    Pair(UserId, UserId),
    Group(GroupId),
}

impl RoomKey {
    /// Canonical key for the 1:1 conversation between `a` and `b`.
    pub fn pair(a: UserId, b: UserId) -> Self {
        Self(Scope::Pair(a.min(b), a.max(b)))
    }

    /// Key for a chat group.
    pub fn group(id: GroupId) -> Self {
        Self(Scope::Group(id))
    }

    /// The two participants of a pair room, lowest id first.
    pub fn as_pair(&self) -> Option<(UserId, UserId)> {
        match self.0 {
            Scope::Pair(lo, hi) => Some((lo, hi)),
            Scope::Group(_) => None,
        }
    }

    pub fn group_id(&self) -> Option<GroupId> {
        match self.0 {
            Scope::Group(id) => Some(id),
            Scope::Pair(..) => None,
        }
    }

    /// Whether `user` is one of the two participants of a pair room.
    pub fn involves(&self, user: UserId) -> bool {
        self.as_pair().is_some_and(|(lo, hi)| lo == user || hi == user)
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Scope::Pair(lo, hi) => write!(f, "pair:{}:{}", lo, hi),
            Scope::Group(id) => write!(f, "group:{}", id),
        }
    }
}

impl FromStr for RoomKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ValidationError::MalformedRoomKey(s.to_string());
        let mut parts = s.split(':');
        let key = match (parts.next(), parts.next(), parts.next()) {
            (Some("pair"), Some(a), Some(b)) => {
                let a = a.parse::<UserId>().map_err(|_| malformed())?;
                let b = b.parse::<UserId>().map_err(|_| malformed())?;
                Self::pair(a, b)
            }
            (Some("group"), Some(id), None) => {
                Self::group(id.parse::<GroupId>().map_err(|_| malformed())?)
            }
            _ => return Err(malformed()),
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(key)
    }
}

impl Serialize for RoomKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_symmetric() {
        for (a, b) in [(1, 2), (2, 1), (5, 5), (100, 3)] {
            let (a, b) = (UserId::new(a), UserId::new(b));
            assert_eq!(RoomKey::pair(a, b), RoomKey::pair(b, a));
            assert_eq!(
                RoomKey::pair(a, b).to_string(),
                RoomKey::pair(b, a).to_string()
            );
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RoomKey::pair(UserId::new(9), UserId::new(2)).to_string(),
            "pair:2:9"
        );
        assert_eq!(RoomKey::group(GroupId::new(7)).to_string(), "group:7");
    }

    #[test]
    fn test_parse_canonicalizes() {
        let key: RoomKey = "pair:9:2".parse().unwrap();
        assert_eq!(key, RoomKey::pair(UserId::new(2), UserId::new(9)));
        assert_eq!(key.to_string(), "pair:2:9");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "pair:1", "pair:1:2:3", "group:", "group:x", "room:1", "group:1:2"] {
            assert!(bad.parse::<RoomKey>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_involves() {
        let key = RoomKey::pair(UserId::new(1), UserId::new(2));
        assert!(key.involves(UserId::new(1)));
        assert!(!key.involves(UserId::new(3)));
        assert!(!RoomKey::group(GroupId::new(1)).involves(UserId::new(1)));
    }

    #[test]
    fn test_serde_as_string() {
        let key = RoomKey::group(GroupId::new(4));
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"group:4\"");
        let parsed: RoomKey = serde_json::from_str("\"pair:3:1\"").unwrap();
        assert_eq!(parsed.as_pair(), Some((UserId::new(1), UserId::new(3))));
    }
}
