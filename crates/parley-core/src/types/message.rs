//! Durable chat messages.

use super::{GroupId, MessageId, RoomKey, UserId};
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Body substituted for a deleted message.
pub const TOMBSTONE: &str = "[This message was deleted]";

/// Content type of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// Where a message lives: exactly one of a receiver or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversation {
    Direct { receiver_id: UserId },
    Group { group_id: GroupId },
}

impl Conversation {
    /// Build from the two nullable columns, rejecting both-set and neither-set.
    pub fn from_parts(
        receiver_id: Option<UserId>,
        group_id: Option<GroupId>,
    ) -> Result<Self, ValidationError> {
        match (receiver_id, group_id) {
            (Some(receiver_id), None) => Ok(Self::Direct { receiver_id }),
            (None, Some(group_id)) => Ok(Self::Group { group_id }),
            _ => Err(ValidationError::AmbiguousTarget),
        }
    }

    pub fn receiver_id(&self) -> Option<UserId> {
        match self {
            Self::Direct { receiver_id } => Some(*receiver_id),
            Self::Group { .. } => None,
        }
    }

    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            Self::Group { group_id } => Some(*group_id),
            Self::Direct { .. } => None,
        }
    }

    /// Room a message in this conversation is broadcast to.
    pub fn room(&self, sender_id: UserId) -> RoomKey {
        match self {
            Self::Direct { receiver_id } => RoomKey::pair(sender_id, *receiver_id),
            Self::Group { group_id } => RoomKey::group(*group_id),
        }
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    pub body: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Only meaningful for direct messages.
    pub is_read: bool,
}

impl Message {
    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn conversation(&self) -> Result<Conversation, ValidationError> {
        Conversation::from_parts(self.receiver_id, self.group_id)
    }

    /// Room this message's events are broadcast to.
    pub fn room(&self) -> Result<RoomKey, ValidationError> {
        Ok(self.conversation()?.room(self.sender_id))
    }

    /// Whether `user` may read this message through a direct conversation.
    ///
    /// Group access depends on membership and is checked against the store.
    pub fn is_participant(&self, user: UserId) -> bool {
        self.sender_id == user || self.receiver_id == Some(user)
    }
}

/// A message about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub conversation: Conversation,
    pub body: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

/// Trim a body and enforce non-emptiness and the length limit.
pub fn normalize_body(body: &str, max_len: usize) -> Result<String, ValidationError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("body"));
    }
    if trimmed.chars().count() > max_len {
        return Err(ValidationError::TooLong {
            field: "body",
            max: max_len,
        });
    }
    Ok(trimmed.to_string())
}

/// Display context for a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: String,
}

/// A message as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
}
