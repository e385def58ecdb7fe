//! Chat operations.
//!
//! Every operation authorizes against the store before mutating it,
//! persists, and only then fans the result out through the room router.
//! Failures are returned to the caller and never broadcast.

use crate::clock::Clock;
use crate::error::GatewayError;
use crate::presence::{ConnectionHandle, ConnectionId, PresenceRegistry};
use crate::protocol::{RoomTarget, ServerEvent};
use crate::rooms::RoomRouter;
use crate::typing::TypingDebouncer;
use crate::Result;
use parley_core::config::{ChatConfig, MAX_HISTORY_PAGE_SIZE};
use parley_core::{
    normalize_body, Conversation, GroupId, Identity, Message, MessageId, MessageKind,
    MessageView, NewMessage, ReactionSummary, ReplyPreview, RoomKey, UserId, UserStatus,
    MAX_REACTION_KIND_LEN,
};
use parley_store::{HistoryPage, MessageStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful operation: the event fanned out to the room,
/// and the room it went to.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub room: RoomKey,
    pub event: ServerEvent,
}

/// Chat business logic shared by every connection and the REST surface.
pub struct ChatService {
    store: Arc<dyn MessageStore>,
    presence: Arc<PresenceRegistry>,
    rooms: Arc<RoomRouter>,
    typing: TypingDebouncer,
    clock: Arc<dyn Clock>,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>, config: ChatConfig) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let rooms = Arc::new(RoomRouter::new(presence.clone()));

        let typing_rooms = rooms.clone();
        let typing = TypingDebouncer::new(config.typing_timeout(), move |sender, peer, is_typing| {
            broadcast_typing(&typing_rooms, sender, peer, is_typing);
        });

        Self {
            store,
            presence,
            rooms,
            typing,
            clock,
            config,
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    pub fn rooms(&self) -> &Arc<RoomRouter> {
        &self.rooms
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Register a freshly authenticated connection.
    ///
    /// The connection gets `authenticated` and the roster; other identities
    /// learn about the online transition if this is the first connection,
    /// and the transition is recorded in the store.
    pub fn connect(&self, handle: &ConnectionHandle) {
        let identity = handle.identity();
        handle.send(ServerEvent::Authenticated {
            identity: identity.clone(),
        });

        if self.presence.register(handle.clone()).is_some() {
            info!(user = %identity.id, conn = %handle.id(), "User online");
            self.record_presence(identity.id, true);
        } else {
            debug!(user = %identity.id, conn = %handle.id(), "Additional connection");
        }
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn disconnect(&self, user: UserId, conn: ConnectionId) {
        let left = self.rooms.leave_all(conn);
        if self.presence.unregister(user, conn).is_none() {
            if !left.is_empty() {
                debug!(user = %user, conn = %conn, rooms = left.len(), "Connection left rooms");
            }
            return;
        }

        info!(user = %user, conn = %conn, "User offline");
        let peers = self.typing.clear_sender(user);
        if !peers.is_empty() {
            debug!(user = %user, peers = peers.len(), "Cleared typing signals");
        }
        self.record_presence(user, false);
    }

    /// Persist a presence transition in the background.
    ///
    /// Runs from `Drop` paths too, so it never awaits; without a runtime
    /// the write is skipped. The store ignores transitions older than the
    /// one it holds, so reordered writes settle on the latest.
    fn record_presence(&self, user: UserId, online: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(user = %user, online, "No runtime, presence not persisted");
            return;
        };
        let store = self.store.clone();
        let at = self.clock.now();
        runtime.spawn(async move {
            if let Err(e) = store.touch_presence(user, online, at).await {
                warn!(user = %user, online, error = %e, "Failed to persist presence");
            }
        });
    }

    /// Every user except `actor`, online first and then by name.
    ///
    /// `online` comes from the live registry; `last_seen` is the last
    /// transition the store recorded.
    pub async fn user_directory(&self, actor: &Identity) -> Result<Vec<UserStatus>> {
        let mut users: Vec<UserStatus> = self
            .store
            .list_users()
            .await?
            .into_iter()
            .filter(|u| u.identity.id != actor.id)
            .map(|mut u| {
                u.online = self.presence.is_online(u.identity.id);
                u
            })
            .collect();
        users.sort_by(|a, b| {
            b.online
                .cmp(&a.online)
                .then_with(|| a.identity.name.cmp(&b.identity.name))
        });
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    /// Resolve and authorize a room for `actor`.
    ///
    /// Peer rooms need an existing peer; group rooms need membership.
    pub async fn authorize_room(&self, actor: &Identity, target: RoomTarget) -> Result<RoomKey> {
        match target {
            RoomTarget::Peer { peer_id } => {
                self.require_user(peer_id).await?;
                Ok(RoomKey::pair(actor.id, peer_id))
            }
            RoomTarget::Group { group_id } => {
                self.require_member(actor, group_id).await?;
                Ok(RoomKey::group(group_id))
            }
        }
    }

    pub async fn join(&self, handle: &ConnectionHandle, target: RoomTarget) -> Result<RoomKey> {
        let room = self.authorize_room(handle.identity(), target).await?;
        if self.rooms.join(room, handle) {
            debug!(conn = %handle.id(), room = %room, "Joined room");
        }
        Ok(room)
    }

    pub fn leave(&self, handle: &ConnectionHandle, target: RoomTarget) -> RoomKey {
        let room = match target {
            RoomTarget::Peer { peer_id } => RoomKey::pair(handle.user_id(), peer_id),
            RoomTarget::Group { group_id } => RoomKey::group(group_id),
        };
        if self.rooms.leave(&room, handle.id()) {
            debug!(conn = %handle.id(), room = %room, "Left room");
        }
        room
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Persist a direct message, then deliver it to the pair room and to
    /// the receiver's connections that are not viewing the conversation.
    pub async fn send_direct_message(
        &self,
        actor: &Identity,
        receiver_id: UserId,
        body: &str,
        kind: MessageKind,
    ) -> Result<Broadcast> {
        let body = normalize_body(body, self.config.max_body_len)?;
        self.require_user(receiver_id).await?;

        let message = self
            .store
            .insert_message(NewMessage {
                sender_id: actor.id,
                conversation: Conversation::Direct { receiver_id },
                body,
                kind,
                reply_to_id: None,
                created_at: self.clock.now(),
            })
            .await?;
        debug!(message = %message.id, from = %actor.id, to = %receiver_id, "Direct message stored");

        let room = RoomKey::pair(actor.id, receiver_id);
        let event = ServerEvent::MessageReceived {
            message: MessageView {
                message,
                sender_name: actor.name.clone(),
                reply_to: None,
            },
            room,
        };
        self.rooms.broadcast(&room, &event);
        self.rooms
            .deliver_to_identity_outside(receiver_id, &room, &event);
        Ok(Broadcast { room, event })
    }

    /// Persist a group message and broadcast it to the group room.
    ///
    /// A reply reference that cannot be resolved in the same group is
    /// dropped rather than rejected.
    pub async fn send_group_message(
        &self,
        actor: &Identity,
        group_id: GroupId,
        body: &str,
        kind: MessageKind,
        reply_to_id: Option<MessageId>,
    ) -> Result<Broadcast> {
        let body = normalize_body(body, self.config.max_body_len)?;
        self.require_member(actor, group_id).await?;

        let reply_to = match reply_to_id {
            Some(id) => self.reply_preview(id, group_id).await?,
            None => None,
        };

        let message = self
            .store
            .insert_message(NewMessage {
                sender_id: actor.id,
                conversation: Conversation::Group { group_id },
                body,
                kind,
                reply_to_id: reply_to.as_ref().map(|r| r.id),
                created_at: self.clock.now(),
            })
            .await?;
        debug!(message = %message.id, from = %actor.id, group = %group_id, "Group message stored");

        let room = RoomKey::group(group_id);
        let event = ServerEvent::MessageReceived {
            message: MessageView {
                message,
                sender_name: actor.name.clone(),
                reply_to,
            },
            room,
        };
        self.rooms.broadcast(&room, &event);
        Ok(Broadcast { room, event })
    }

    async fn reply_preview(&self, id: MessageId, group_id: GroupId) -> Result<Option<ReplyPreview>> {
        let Some(target) = self.store.get_message(id).await? else {
            debug!(reply_to = %id, "Reply target missing, omitting");
            return Ok(None);
        };
        if target.group_id != Some(group_id) {
            debug!(reply_to = %id, "Reply target outside group, omitting");
            return Ok(None);
        }
        let sender_name = self
            .store
            .find_user(target.sender_id)
            .await?
            .map(|u| u.name)
            .unwrap_or_default();
        Ok(Some(ReplyPreview {
            id: target.id,
            sender_id: target.sender_id,
            sender_name,
            body: target.body,
        }))
    }

    /// Replace a message body. Only the sender may edit, only once, and only
    /// within the edit window.
    pub async fn edit_message(
        &self,
        actor: &Identity,
        message_id: MessageId,
        new_body: &str,
    ) -> Result<Broadcast> {
        let new_body = normalize_body(new_body, self.config.max_body_len)?;
        let message = self.require_message(message_id).await?;

        if message.sender_id != actor.id {
            warn!(user = %actor.id, message = %message_id, "Edit of another user's message rejected");
            return Err(GatewayError::Forbidden(
                "only the sender can edit a message".into(),
            ));
        }
        if message.is_deleted() {
            return Err(GatewayError::Conflict("message was deleted".into()));
        }
        if message.is_edited() {
            return Err(GatewayError::Conflict("message was already edited".into()));
        }
        if message.body == new_body {
            return Err(GatewayError::InvalidInput(
                "new body is identical to the current one".into(),
            ));
        }

        let now = self.clock.now();
        if now - message.created_at > self.config.edit_window() {
            return Err(GatewayError::Expired("edit window has elapsed".into()));
        }

        let edited = self
            .store
            .edit_message(message_id, &new_body, now)
            .await?
            .ok_or_else(|| GatewayError::Conflict("message changed concurrently".into()))?;

        let room = edited.room()?;
        let event = ServerEvent::MessageEdited {
            message_id,
            room,
            new_body: edited.body,
            edited_at: edited.edited_at.unwrap_or(now),
        };
        self.rooms.broadcast(&room, &event);
        Ok(Broadcast { room, event })
    }

    /// Soft-delete a message for everyone.
    ///
    /// Returns `None` when the message was already deleted: nothing changes
    /// and nothing is broadcast.
    pub async fn delete_message(
        &self,
        actor: &Identity,
        message_id: MessageId,
        for_everyone: bool,
    ) -> Result<Option<Broadcast>> {
        let message = self.require_message(message_id).await?;

        let allowed = message.sender_id == actor.id
            || match message.group_id {
                Some(group) => self
                    .store
                    .group_role(group, actor.id)
                    .await?
                    .is_some_and(|role| role.is_admin()),
                None => false,
            };
        if !allowed {
            warn!(user = %actor.id, message = %message_id, "Delete rejected");
            return Err(GatewayError::Forbidden(
                "only the sender or a group admin can delete a message".into(),
            ));
        }

        if message.is_deleted() {
            return Ok(None);
        }
        if !for_everyone {
            debug!(message = %message_id, "Per-viewer delete requested, deleting for everyone");
        }

        let deleted = self
            .store
            .soft_delete(message_id, self.clock.now())
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("message {}", message_id)))?;
        if !deleted.changed {
            debug!(message = %message_id, "Message deleted by a concurrent request");
            return Ok(None);
        }

        let room = deleted.message.room()?;
        let event = ServerEvent::MessageDeleted { message_id, room };
        self.rooms.broadcast(&room, &event);
        Ok(Some(Broadcast { room, event }))
    }

    /// Toggle or replace the actor's reaction and broadcast the full summary.
    pub async fn react(
        &self,
        actor: &Identity,
        message_id: MessageId,
        kind: &str,
    ) -> Result<Broadcast> {
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(GatewayError::InvalidInput("reaction kind must not be empty".into()));
        }
        if kind.chars().count() > MAX_REACTION_KIND_LEN {
            return Err(GatewayError::InvalidInput(format!(
                "reaction kind exceeds {} characters",
                MAX_REACTION_KIND_LEN
            )));
        }

        let message = self.require_message(message_id).await?;
        if !self.can_read(actor, &message).await? {
            warn!(user = %actor.id, message = %message_id, "Reaction on unreadable message rejected");
            return Err(GatewayError::Forbidden("no access to this message".into()));
        }

        let outcome = self
            .store
            .toggle_reaction(message_id, actor.id, kind, self.clock.now())
            .await?;
        debug!(message = %message_id, user = %actor.id, ?outcome, "Reaction toggled");

        let rows = self.store.reactions(message_id).await?;
        let summary = ReactionSummary::from_reactions(message_id, actor.id, &rows);
        let room = message.room()?;
        let event = ServerEvent::reaction_summary(room, summary);
        self.rooms.broadcast(&room, &event);
        Ok(Broadcast { room, event })
    }

    /// Edge-triggered typing indicator.
    ///
    /// Returns true if the call changed the typing state. Edges are fanned
    /// out to the pair room by the debouncer's change handler.
    pub fn typing(&self, actor: &Identity, peer_id: UserId, is_typing: bool) -> bool {
        if is_typing {
            self.typing.start(actor.id, peer_id)
        } else {
            self.typing.stop(actor.id, peer_id)
        }
    }

    /// Mark the peer's messages to `actor` as read and tell the peer.
    pub async fn mark_read(&self, actor: &Identity, peer_id: UserId) -> Result<u64> {
        let count = self.store.mark_read(actor.id, peer_id).await?;
        if count > 0 {
            self.rooms.deliver_to_identity(
                peer_id,
                &ServerEvent::ReadReceipt {
                    reader_id: actor.id,
                    count,
                },
            );
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    fn page(&self, before: Option<MessageId>, limit: Option<u32>) -> HistoryPage {
        let limit = limit
            .unwrap_or(self.config.history_page_size)
            .clamp(1, MAX_HISTORY_PAGE_SIZE);
        HistoryPage { before, limit }
    }

    pub async fn direct_history(
        &self,
        actor: &Identity,
        peer_id: UserId,
        before: Option<MessageId>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageView>> {
        self.require_user(peer_id).await?;
        let messages = self
            .store
            .conversation_history(actor.id, peer_id, self.page(before, limit))
            .await?;
        self.views(messages).await
    }

    pub async fn group_history(
        &self,
        actor: &Identity,
        group_id: GroupId,
        before: Option<MessageId>,
        limit: Option<u32>,
    ) -> Result<Vec<MessageView>> {
        self.require_member(actor, group_id).await?;
        let messages = self
            .store
            .group_history(group_id, self.page(before, limit))
            .await?;
        self.views(messages).await
    }

    async fn views(&self, messages: Vec<Message>) -> Result<Vec<MessageView>> {
        let mut names: HashMap<UserId, String> = HashMap::new();
        let mut views = Vec::with_capacity(messages.len());
        for message in messages {
            if !names.contains_key(&message.sender_id) {
                let name = self
                    .store
                    .find_user(message.sender_id)
                    .await?
                    .map(|u| u.name)
                    .unwrap_or_default();
                names.insert(message.sender_id, name);
            }
            let sender_name = names.get(&message.sender_id).cloned().unwrap_or_default();
            views.push(MessageView {
                message,
                sender_name,
                reply_to: None,
            });
        }
        Ok(views)
    }

    // ------------------------------------------------------------------
    // Authorization helpers
    // ------------------------------------------------------------------

    async fn require_user(&self, id: UserId) -> Result<Identity> {
        self.store
            .find_user(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", id)))
    }

    async fn require_member(&self, actor: &Identity, group_id: GroupId) -> Result<()> {
        match self.store.group_role(group_id, actor.id).await? {
            Some(_) => Ok(()),
            None => {
                warn!(user = %actor.id, group = %group_id, "Non-member access to group rejected");
                Err(GatewayError::Forbidden(format!(
                    "not a member of group {}",
                    group_id
                )))
            }
        }
    }

    async fn require_message(&self, id: MessageId) -> Result<Message> {
        self.store
            .get_message(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("message {}", id)))
    }

    /// Sender, receiver, or member of the message's group.
    async fn can_read(&self, actor: &Identity, message: &Message) -> Result<bool> {
        if message.is_participant(actor.id) {
            return Ok(true);
        }
        match message.group_id {
            Some(group) => Ok(self.store.group_role(group, actor.id).await?.is_some()),
            None => Ok(false),
        }
    }
}

/// Typing state goes to the pair room, minus the typist's own connections.
fn broadcast_typing(rooms: &RoomRouter, sender: UserId, peer: UserId, is_typing: bool) {
    let room = RoomKey::pair(sender, peer);
    rooms.broadcast_except_user(
        &room,
        sender,
        &ServerEvent::TypingChanged {
            user_id: sender,
            is_typing,
        },
    );
}
