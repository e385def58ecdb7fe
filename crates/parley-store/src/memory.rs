//! In-process message store.

use crate::store::{HistoryPage, MessageStore, SoftDeleted};
use crate::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{
    Conversation, GroupId, GroupRole, Identity, Message, MessageId, NewMessage, Reaction,
    ReactionOutcome, UserId, UserStatus, TOMBSTONE,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, Identity>,
    groups: BTreeMap<GroupId, Group>,
    messages: BTreeMap<MessageId, Message>,
    reactions: HashMap<(MessageId, UserId), (String, DateTime<Utc>)>,
    presence: HashMap<UserId, (bool, DateTime<Utc>)>,
    next_user: i64,
    next_group: i64,
    next_message: i64,
}

struct Group {
    members: HashMap<UserId, GroupRole>,
}

/// Message store that keeps everything in memory.
///
/// All state sits behind one lock, so each call is atomic with respect to
/// every other call.
#[derive(Default)]
pub struct MemoryMessageStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of persisted messages.
    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

fn page_of<'a>(
    matches: impl DoubleEndedIterator<Item = &'a Message>,
    page: HistoryPage,
) -> Vec<Message> {
    let mut newest: Vec<Message> = matches
        .rev()
        .filter(|m| page.before.map_or(true, |before| m.id < before))
        .take(page.limit as usize)
        .cloned()
        .collect();
    newest.reverse();
    newest
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn find_user(&self, id: UserId) -> Result<Option<Identity>> {
        self.check_available()?;
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn group_role(&self, group: GroupId, user: UserId) -> Result<Option<GroupRole>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .groups
            .get(&group)
            .and_then(|g| g.members.get(&user).copied()))
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        if !inner.users.contains_key(&message.sender_id) {
            return Err(StoreError::NotFound(format!("user {}", message.sender_id)));
        }
        match message.conversation {
            Conversation::Direct { receiver_id } if !inner.users.contains_key(&receiver_id) => {
                return Err(StoreError::NotFound(format!("user {}", receiver_id)));
            }
            Conversation::Group { group_id } if !inner.groups.contains_key(&group_id) => {
                return Err(StoreError::NotFound(format!("group {}", group_id)));
            }
            _ => {}
        }

        inner.next_message += 1;
        let stored = Message {
            id: MessageId::new(inner.next_message),
            sender_id: message.sender_id,
            receiver_id: message.conversation.receiver_id(),
            group_id: message.conversation.group_id(),
            body: message.body,
            kind: message.kind,
            reply_to_id: message.reply_to_id,
            created_at: message.created_at,
            edited_at: None,
            deleted_at: None,
            is_read: false,
        };
        inner.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        self.check_available()?;
        Ok(self.inner.read().await.messages.get(&id).cloned())
    }

    async fn edit_message(
        &self,
        id: MessageId,
        body: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let Some(message) = inner.messages.get_mut(&id) else {
            return Ok(None);
        };
        if message.is_deleted() || message.is_edited() {
            return Ok(None);
        }
        message.body = body.to_string();
        message.edited_at = Some(edited_at);
        Ok(Some(message.clone()))
    }

    async fn soft_delete(
        &self,
        id: MessageId,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<SoftDeleted>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let Some(message) = inner.messages.get_mut(&id) else {
            return Ok(None);
        };
        let changed = !message.is_deleted();
        if changed {
            message.body = TOMBSTONE.to_string();
            message.deleted_at = Some(deleted_at);
        }
        Ok(Some(SoftDeleted {
            message: message.clone(),
            changed,
        }))
    }

    async fn conversation_history(
        &self,
        a: UserId,
        b: UserId,
        page: HistoryPage,
    ) -> Result<Vec<Message>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let matches = inner.messages.values().filter(|m| {
            (m.sender_id == a && m.receiver_id == Some(b))
                || (m.sender_id == b && m.receiver_id == Some(a))
        });
        Ok(page_of(matches, page))
    }

    async fn group_history(&self, group: GroupId, page: HistoryPage) -> Result<Vec<Message>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let matches = inner
            .messages
            .values()
            .filter(|m| m.group_id == Some(group));
        Ok(page_of(matches, page))
    }

    async fn mark_read(&self, reader: UserId, sender: UserId) -> Result<u64> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for message in inner.messages.values_mut() {
            if message.sender_id == sender && message.receiver_id == Some(reader) && !message.is_read
            {
                message.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn toggle_reaction(
        &self,
        message: MessageId,
        user: UserId,
        kind: &str,
        at: DateTime<Utc>,
    ) -> Result<ReactionOutcome> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if !inner.messages.contains_key(&message) {
            return Err(StoreError::NotFound(format!("message {}", message)));
        }

        let key = (message, user);
        let existing = inner.reactions.get(&key).map(|(k, _)| k.clone());
        let outcome = match existing {
            Some(previous) if previous == kind => {
                inner.reactions.remove(&key);
                ReactionOutcome::Removed
            }
            Some(previous) => {
                inner.reactions.insert(key, (kind.to_string(), at));
                ReactionOutcome::Replaced { previous }
            }
            None => {
                inner.reactions.insert(key, (kind.to_string(), at));
                ReactionOutcome::Added
            }
        };
        Ok(outcome)
    }

    async fn reactions(&self, message: MessageId) -> Result<Vec<Reaction>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut rows: Vec<Reaction> = inner
            .reactions
            .iter()
            .filter(|((msg, _), _)| *msg == message)
            .map(|((msg, user), (kind, created_at))| Reaction {
                message_id: *msg,
                user_id: *user,
                user_name: inner
                    .users
                    .get(user)
                    .map(|u| u.name.clone())
                    .unwrap_or_default(),
                kind: kind.clone(),
                created_at: *created_at,
            })
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.user_id));
        Ok(rows)
    }

    async fn touch_presence(&self, user: UserId, online: bool, at: DateTime<Utc>) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user) {
            return Err(StoreError::NotFound(format!("user {}", user)));
        }
        match inner.presence.get(&user) {
            Some((_, last_seen)) if *last_seen > at => {}
            _ => {
                inner.presence.insert(user, (online, at));
            }
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserStatus>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .map(|identity| {
                let presence = inner.presence.get(&identity.id);
                UserStatus {
                    identity: identity.clone(),
                    online: presence.is_some_and(|(online, _)| *online),
                    last_seen: presence.map(|(_, at)| *at),
                }
            })
            .collect())
    }

    async fn create_user(&self, name: &str) -> Result<Identity> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        inner.next_user += 1;
        let identity = Identity::new(inner.next_user, name);
        inner.users.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn create_group(&self, _name: &str, creator: UserId) -> Result<GroupId> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&creator) {
            return Err(StoreError::NotFound(format!("user {}", creator)));
        }
        inner.next_group += 1;
        let id = GroupId::new(inner.next_group);
        let members = HashMap::from([(creator, GroupRole::Admin)]);
        inner.groups.insert(id, Group { members });
        Ok(id)
    }

    async fn add_group_member(
        &self,
        group: GroupId,
        user: UserId,
        role: GroupRole,
    ) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user) {
            return Err(StoreError::NotFound(format!("user {}", user)));
        }
        let entry = inner
            .groups
            .get_mut(&group)
            .ok_or_else(|| StoreError::NotFound(format!("group {}", group)))?;
        entry.members.insert(user, role);
        Ok(())
    }
}
