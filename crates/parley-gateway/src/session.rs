//! Per-connection session state machine.
//!
//! ```text
//! Unauthenticated --authenticate ok--> Authenticated --disconnect--> Disconnected
//!        |                                  |
//!        +--- any other event / bad credential ---> Disconnected
//! ```
//!
//! Room membership ("Joined") is tracked per room by the [`RoomRouter`];
//! the session only needs to know whether it has an identity.
//!
//! [`RoomRouter`]: crate::rooms::RoomRouter

use crate::auth::CredentialVerifier;
use crate::chat::{Broadcast, ChatService};
use crate::error::GatewayError;
use crate::presence::{ConnectionHandle, ConnectionId};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::Result;
use futures::FutureExt;
use parley_core::Identity;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What the transport should do after an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

enum State {
    Unauthenticated,
    Authenticated(ConnectionHandle),
    Disconnected,
}

/// One connection's view of the gateway.
pub struct Session {
    id: ConnectionId,
    state: State,
    chat: Arc<ChatService>,
    verifier: Arc<dyn CredentialVerifier>,
    tx: mpsc::Sender<ServerEvent>,
}

impl Session {
    pub fn new(
        id: ConnectionId,
        chat: Arc<ChatService>,
        verifier: Arc<dyn CredentialVerifier>,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            state: State::Unauthenticated,
            chat,
            verifier,
            tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            State::Authenticated(handle) => Some(handle.identity()),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, State::Authenticated(_))
    }

    /// Queue an error for this connection only.
    pub fn reject(&self, op: &str, err: &GatewayError) {
        self.reply(ServerEvent::error(op, err));
    }

    fn reply(&self, event: ServerEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!(conn = %self.id, error = %e, "Dropping reply");
        }
    }

    /// Verify a credential and move to `Authenticated`.
    ///
    /// Any failure closes the connection.
    pub async fn authenticate(&mut self, credential: &str) -> Flow {
        match self.state {
            State::Unauthenticated => {}
            State::Authenticated(_) => {
                self.reject(
                    "authenticate",
                    &GatewayError::InvalidInput("already authenticated".into()),
                );
                return Flow::Continue;
            }
            State::Disconnected => return Flow::Close,
        }

        let verified = AssertUnwindSafe(self.verifier.verify(credential))
            .catch_unwind()
            .await;
        let identity = match verified {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                warn!(conn = %self.id, error = %e, "Authentication failed");
                self.reject("authenticate", &GatewayError::from(e));
                self.state = State::Disconnected;
                return Flow::Close;
            }
            Err(panic) => {
                error!(conn = %self.id, panic = %panic_message(&*panic), "Credential verifier panicked");
                self.reject(
                    "authenticate",
                    &GatewayError::Internal("credential verification failed".into()),
                );
                self.state = State::Disconnected;
                return Flow::Close;
            }
        };

        info!(conn = %self.id, user = %identity.id, name = %identity.name, "Authenticated");
        let handle = ConnectionHandle::new(self.id, identity, self.tx.clone());
        self.chat.connect(&handle);
        self.state = State::Authenticated(handle);
        Flow::Continue
    }

    /// Handle one text frame.
    pub async fn handle_text(&mut self, text: &str) -> Flow {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(event).await,
            Err(e) if self.is_authenticated() => {
                debug!(conn = %self.id, error = %e, "Malformed frame");
                self.reject("unknown", &GatewayError::InvalidInput(e.to_string()));
                Flow::Continue
            }
            Err(e) => {
                warn!(conn = %self.id, error = %e, "Malformed frame before authentication");
                self.reject(
                    "unknown",
                    &GatewayError::Unauthenticated("authenticate first".into()),
                );
                self.state = State::Disconnected;
                Flow::Close
            }
        }
    }

    /// Handle one decoded event.
    pub async fn handle(&mut self, event: ClientEvent) -> Flow {
        let handle = match &self.state {
            State::Disconnected => return Flow::Close,
            State::Unauthenticated => None,
            State::Authenticated(handle) => Some(handle.clone()),
        };
        let Some(handle) = handle else {
            if let ClientEvent::Authenticate { credential } = event {
                return self.authenticate(&credential).await;
            }
            warn!(conn = %self.id, op = event.name(), "Event before authentication");
            self.reject(
                event.name(),
                &GatewayError::Unauthenticated("authenticate first".into()),
            );
            self.state = State::Disconnected;
            return Flow::Close;
        };

        if let ClientEvent::Authenticate { .. } = event {
            return self.authenticate("").await;
        }

        let op = event.name();
        debug!(conn = %self.id, user = %handle.user_id(), op, "Dispatching");

        let outcome = AssertUnwindSafe(self.dispatch(&handle, event))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn = %self.id, op, error = %e, "Operation failed");
                self.reject(op, &e);
            }
            Err(panic) => {
                error!(conn = %self.id, op, panic = %panic_message(&*panic), "Operation panicked");
                self.reject(op, &GatewayError::Internal("operation failed".into()));
            }
        }
        Flow::Continue
    }

    async fn dispatch(&self, handle: &ConnectionHandle, event: ClientEvent) -> Result<()> {
        let actor = handle.identity();
        match event {
            // Handled before dispatch.
            ClientEvent::Authenticate { .. } => Ok(()),
            ClientEvent::JoinRoom(target) => {
                let room = self.chat.join(handle, target).await?;
                handle.send(ServerEvent::RoomJoined { room });
                Ok(())
            }
            ClientEvent::LeaveRoom(target) => {
                let room = self.chat.leave(handle, target);
                handle.send(ServerEvent::RoomLeft { room });
                Ok(())
            }
            ClientEvent::SendDirectMessage {
                receiver_id,
                body,
                kind,
            } => {
                let sent = self
                    .chat
                    .send_direct_message(actor, receiver_id, &body, kind)
                    .await?;
                // A self-addressed message already reached this connection
                // through the receiver delivery.
                if receiver_id != actor.id {
                    self.echo(handle, sent);
                }
                Ok(())
            }
            ClientEvent::SendGroupMessage {
                group_id,
                body,
                kind,
                reply_to_id,
            } => {
                let sent = self
                    .chat
                    .send_group_message(actor, group_id, &body, kind, reply_to_id)
                    .await?;
                self.echo(handle, sent);
                Ok(())
            }
            ClientEvent::EditMessage { message_id, body } => {
                let edited = self.chat.edit_message(actor, message_id, &body).await?;
                self.echo(handle, edited);
                Ok(())
            }
            ClientEvent::DeleteMessage {
                message_id,
                for_everyone,
            } => {
                if let Some(deleted) = self
                    .chat
                    .delete_message(actor, message_id, for_everyone)
                    .await?
                {
                    self.echo(handle, deleted);
                }
                Ok(())
            }
            ClientEvent::React { message_id, kind } => {
                let summary = self.chat.react(actor, message_id, &kind).await?;
                self.echo(handle, summary);
                Ok(())
            }
            ClientEvent::Typing { peer_id, is_typing } => {
                self.chat.typing(actor, peer_id, is_typing);
                Ok(())
            }
            ClientEvent::MarkRead { peer_id } => {
                self.chat.mark_read(actor, peer_id).await?;
                Ok(())
            }
            ClientEvent::Ping => {
                handle.send(ServerEvent::Pong);
                Ok(())
            }
        }
    }

    /// The originating connection sees the outcome even when it has not
    /// joined the room the event went to.
    fn echo(&self, handle: &ConnectionHandle, broadcast: Broadcast) {
        if !self.chat.rooms().is_member(&broadcast.room, handle.id()) {
            handle.send(broadcast.event);
        }
    }

    /// Leave every room and drop presence. Safe to call more than once.
    pub fn disconnect(&mut self) {
        let previous = std::mem::replace(&mut self.state, State::Disconnected);
        if let State::Authenticated(handle) = previous {
            info!(conn = %self.id, user = %handle.user_id(), "Disconnected");
            self.chat.disconnect(handle.user_id(), handle.id());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
