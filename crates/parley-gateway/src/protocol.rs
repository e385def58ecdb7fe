//! Wire protocol.
//!
//! Every frame is a JSON text frame of the form
//! `{"type": "<camelCaseName>", "data": {...}}`. Both directions are closed
//! enums so every event is handled exhaustively.

use chrono::{DateTime, Utc};
use parley_core::{
    GroupId, Identity, MessageId, MessageKind, MessageView, ReactionCount, ReactionSummary,
    RoomKey, UserId,
};
use serde::{Deserialize, Serialize};

/// Which room a join or leave refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomTarget {
    Peer {
        #[serde(rename = "peerId")]
        peer_id: UserId,
    },
    Group {
        #[serde(rename = "groupId")]
        group_id: GroupId,
    },
}

fn default_true() -> bool {
    true
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    Authenticate {
        credential: String,
    },
    JoinRoom(RoomTarget),
    LeaveRoom(RoomTarget),
    SendDirectMessage {
        receiver_id: UserId,
        body: String,
        #[serde(default)]
        kind: MessageKind,
    },
    SendGroupMessage {
        group_id: GroupId,
        body: String,
        #[serde(default)]
        kind: MessageKind,
        #[serde(default)]
        reply_to_id: Option<MessageId>,
    },
    EditMessage {
        message_id: MessageId,
        body: String,
    },
    DeleteMessage {
        message_id: MessageId,
        #[serde(default = "default_true")]
        for_everyone: bool,
    },
    React {
        message_id: MessageId,
        kind: String,
    },
    Typing {
        peer_id: UserId,
        is_typing: bool,
    },
    MarkRead {
        peer_id: UserId,
    },
    Ping,
}

impl ClientEvent {
    /// Wire name, echoed back in `operationError.op`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::JoinRoom(_) => "joinRoom",
            Self::LeaveRoom(_) => "leaveRoom",
            Self::SendDirectMessage { .. } => "sendDirectMessage",
            Self::SendGroupMessage { .. } => "sendGroupMessage",
            Self::EditMessage { .. } => "editMessage",
            Self::DeleteMessage { .. } => "deleteMessage",
            Self::React { .. } => "react",
            Self::Typing { .. } => "typing",
            Self::MarkRead { .. } => "markRead",
            Self::Ping => "ping",
        }
    }
}

/// Error codes reported in `operationError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    InvalidInput,
    Forbidden,
    NotFound,
    Expired,
    Conflict,
    StoreUnavailable,
    Unauthenticated,
    Internal,
}

/// Events sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Authenticated {
        identity: Identity,
    },
    PresenceRoster {
        users: Vec<Identity>,
    },
    PresenceChanged {
        user: Identity,
        online: bool,
    },
    RoomJoined {
        room: RoomKey,
    },
    RoomLeft {
        room: RoomKey,
    },
    MessageReceived {
        message: MessageView,
        room: RoomKey,
    },
    MessageEdited {
        message_id: MessageId,
        room: RoomKey,
        new_body: String,
        edited_at: DateTime<Utc>,
    },
    MessageDeleted {
        message_id: MessageId,
        room: RoomKey,
    },
    ReactionSummary {
        message_id: MessageId,
        room: RoomKey,
        reactions: Vec<ReactionCount>,
        actor_id: UserId,
        self_reacted: bool,
    },
    TypingChanged {
        user_id: UserId,
        is_typing: bool,
    },
    ReadReceipt {
        reader_id: UserId,
        count: u64,
    },
    OperationError {
        op: String,
        code: ErrorCode,
        detail: String,
        retryable: bool,
    },
    Pong,
}

impl ServerEvent {
    /// Full reaction state of a message, broadcast to its room.
    pub fn reaction_summary(room: RoomKey, summary: ReactionSummary) -> Self {
        Self::ReactionSummary {
            message_id: summary.message_id,
            room,
            reactions: summary.reactions,
            actor_id: summary.actor_id,
            self_reacted: summary.self_reacted,
        }
    }

    /// Error addressed to the connection that issued `op`.
    pub fn error(op: &str, err: &crate::GatewayError) -> Self {
        Self::OperationError {
            op: op.to_string(),
            code: err.code(),
            detail: err.detail(),
            retryable: err.is_retryable(),
        }
    }

    /// Serialize for a text frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
