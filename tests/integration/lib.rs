//! Shared fixtures for the integration tests.

use chrono::{Duration, TimeZone, Utc};
use parley_core::config::ChatConfig;
use parley_core::{GroupId, GroupRole, Identity, SecretString};
use parley_gateway::{
    ChatService, ConnectionId, Flow, ManualClock, ServerEvent, Session, SignedTokenVerifier,
};
use parley_gateway::{ClientEvent, ErrorCode};
use parley_store::{MemoryMessageStore, MessageStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const SECRET: &str = "integration-secret";

/// In-process gateway: real chat service and sessions over a memory store,
/// with a clock the test controls.
pub struct Harness {
    pub store: Arc<MemoryMessageStore>,
    pub clock: Arc<ManualClock>,
    pub chat: Arc<ChatService>,
    pub verifier: Arc<SignedTokenVerifier>,
    next_conn: AtomicU64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ChatConfig::default())
    }

    pub fn with_config(config: ChatConfig) -> Self {
        let store = Arc::new(MemoryMessageStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let chat = Arc::new(ChatService::new(store.clone(), clock.clone(), config));
        let verifier = Arc::new(SignedTokenVerifier::new(
            SecretString::new(SECRET),
            store.clone(),
            clock.clone(),
        ));
        Self {
            store,
            clock,
            chat,
            verifier,
            next_conn: AtomicU64::new(1),
        }
    }

    pub async fn user(&self, name: &str) -> Identity {
        self.store.create_user(name).await.unwrap()
    }

    /// Create a group administered by `admin` with `members` as plain members.
    pub async fn group(&self, name: &str, admin: &Identity, members: &[&Identity]) -> GroupId {
        let group = self.store.create_group(name, admin.id).await.unwrap();
        for member in members {
            self.store
                .add_group_member(group, member.id, GroupRole::Member)
                .await
                .unwrap();
        }
        group
    }

    pub fn token(&self, identity: &Identity) -> String {
        use parley_gateway::Clock;
        self.verifier
            .sign(identity.id, self.clock.now() + Duration::days(30))
            .unwrap()
    }

    /// An unauthenticated client.
    pub fn client(&self) -> Client {
        let (tx, rx) = mpsc::channel(256);
        let id = ConnectionId::new(self.next_conn.fetch_add(1, Ordering::Relaxed));
        let session = Session::new(id, self.chat.clone(), self.verifier.clone(), tx);
        Client { session, rx }
    }

    /// A client authenticated as `identity`, with its greeting drained.
    pub async fn connect(&self, identity: &Identity) -> Client {
        let mut client = self.client();
        let flow = client
            .send(ClientEvent::Authenticate {
                credential: self.token(identity),
            })
            .await;
        assert_eq!(flow, Flow::Continue);
        client.events();
        client
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// One in-process connection.
pub struct Client {
    pub session: Session,
    rx: mpsc::Receiver<ServerEvent>,
}

impl Client {
    pub async fn send(&mut self, event: ClientEvent) -> Flow {
        self.session.handle(event).await
    }

    /// Everything queued for this connection so far.
    pub fn events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Error codes among the queued events.
    pub fn errors(&mut self) -> Vec<ErrorCode> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::OperationError { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }
}
