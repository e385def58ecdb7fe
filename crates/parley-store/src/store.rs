//! The durable store boundary.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{
    GroupId, GroupRole, Identity, Message, MessageId, NewMessage, Reaction, ReactionOutcome,
    UserId, UserStatus,
};

/// A page of history: the newest `limit` messages older than `before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPage {
    pub before: Option<MessageId>,
    pub limit: u32,
}

impl HistoryPage {
    pub fn latest(limit: u32) -> Self {
        Self {
            before: None,
            limit,
        }
    }
}

/// Outcome of [`MessageStore::soft_delete`].
#[derive(Debug, Clone, PartialEq)]
pub struct SoftDeleted {
    pub message: Message,
    /// False when the message was already deleted and nothing was written.
    pub changed: bool,
}

/// Persistence of messages, reactions and group membership.
///
/// Every mutation is atomic per call. Implementations never retry
/// internally; a failed call is surfaced to the caller as-is.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Resolve a user from the identity directory.
    async fn find_user(&self, id: UserId) -> Result<Option<Identity>>;

    /// Role of `user` in `group`, or `None` if not a member.
    async fn group_role(&self, group: GroupId, user: UserId) -> Result<Option<GroupRole>>;

    /// Persist a new message and return it with its generated id.
    async fn insert_message(&self, message: NewMessage) -> Result<Message>;

    /// Load a message by id.
    async fn get_message(&self, id: MessageId) -> Result<Option<Message>>;

    /// Replace the body and stamp `edited_at`.
    ///
    /// Applies only if the message exists, is not deleted and was never
    /// edited; returns `None` otherwise.
    async fn edit_message(
        &self,
        id: MessageId,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>>;

    /// Replace the body with the tombstone and stamp `deleted_at`.
    ///
    /// A message that is already deleted is returned unchanged with
    /// `changed == false`; of several concurrent callers exactly one sees
    /// `changed == true`. Returns `None` only if the message does not exist.
    async fn soft_delete(
        &self,
        id: MessageId,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<SoftDeleted>>;

    /// Direct messages between `a` and `b`, oldest first.
    async fn conversation_history(
        &self,
        a: UserId,
        b: UserId,
        page: HistoryPage,
    ) -> Result<Vec<Message>>;

    /// Messages of a group, oldest first.
    async fn group_history(&self, group: GroupId, page: HistoryPage) -> Result<Vec<Message>>;

    /// Mark every unread message from `sender` to `reader` as read.
    /// Returns how many rows changed.
    async fn mark_read(&self, reader: UserId, sender: UserId) -> Result<u64>;

    /// Atomically toggle or replace `user`'s reaction on `message`.
    ///
    /// Same kind as the existing row removes it, a different kind replaces
    /// it, no row inserts one. At most one row per (message, user) exists
    /// afterwards regardless of concurrent callers.
    async fn toggle_reaction(
        &self,
        message: MessageId,
        user: UserId,
        kind: &str,
        at: DateTime<Utc>,
    ) -> Result<ReactionOutcome>;

    /// Current reactions on a message, oldest first.
    async fn reactions(&self, message: MessageId) -> Result<Vec<Reaction>>;

    /// Record an online/offline transition of `user` at `at`.
    ///
    /// `last_seen` only moves forward: a transition older than the stored
    /// one is ignored, so late writes cannot overwrite a newer status.
    async fn touch_presence(&self, user: UserId, online: bool, at: DateTime<Utc>) -> Result<()>;

    /// Every user in the directory with its recorded presence, by id.
    async fn list_users(&self) -> Result<Vec<UserStatus>>;

    /// Add a user to the identity directory.
    async fn create_user(&self, name: &str) -> Result<Identity>;

    /// Create a group; the creator becomes its admin.
    async fn create_group(&self, name: &str, creator: UserId) -> Result<GroupId>;

    /// Add or update a group membership.
    async fn add_group_member(&self, group: GroupId, user: UserId, role: GroupRole)
        -> Result<()>;
}
