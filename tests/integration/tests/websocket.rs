//! Real WebSocket round trips against a gateway bound to an ephemeral port.

use chrono::{Duration, Utc};
use futures::{SinkExt, StreamExt};
use parley_core::{Config, Identity, SecretString};
use parley_gateway::{Gateway, SignedTokenVerifier, SystemClock};
use parley_store::{MemoryMessageStore, MessageStore};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "websocket-secret";

struct Server {
    addr: SocketAddr,
    signer: SignedTokenVerifier,
    alice: Identity,
    bob: Identity,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    async fn start(mut config: Config) -> Self {
        config.gateway.ping_interval_secs = 0;
        let store = Arc::new(MemoryMessageStore::new());
        let alice = store.create_user("alice").await.unwrap();
        let bob = store.create_user("bob").await.unwrap();

        let verifier = Arc::new(SignedTokenVerifier::new(
            SecretString::new(SECRET),
            store.clone(),
            Arc::new(SystemClock),
        ));
        let signer =
            SignedTokenVerifier::new(SecretString::new(SECRET), store.clone(), Arc::new(SystemClock));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = oneshot::channel::<()>();
        let gateway = Gateway::new(config, store, verifier);
        tokio::spawn(async move {
            gateway
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            signer,
            alice,
            bob,
            shutdown: Some(shutdown),
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    fn token(&self, identity: &Identity) -> String {
        self.signer
            .sign(identity.id, Utc::now() + Duration::hours(1))
            .unwrap()
    }

    /// Connect and authenticate with a first `authenticate` frame.
    async fn login(&self, identity: &Identity) -> Ws {
        let (mut ws, _) = connect_async(self.url()).await.unwrap();
        send(
            &mut ws,
            json!({"type": "authenticate", "data": {"credential": self.token(identity)}}),
        )
        .await;
        let greeting = next_event(&mut ws).await.unwrap();
        assert_eq!(greeting["type"], "authenticated");
        let roster = next_event(&mut ws).await.unwrap();
        assert_eq!(roster["type"], "presenceRoster");
        ws
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn send(ws: &mut Ws, event: Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

/// Next JSON event, skipping control frames. `None` once the socket closes.
async fn next_event(ws: &mut Ws) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Skip events until one of type `kind` arrives.
async fn expect_event(ws: &mut Ws, kind: &str) -> Value {
    loop {
        let event = next_event(ws)
            .await
            .unwrap_or_else(|| panic!("socket closed while waiting for {}", kind));
        if event["type"] == kind {
            return event;
        }
    }
}

#[tokio::test]
async fn test_direct_message_round_trip() {
    let server = Server::start(Config::default()).await;
    let mut alice = server.login(&server.alice).await;
    let mut bob = server.login(&server.bob).await;

    send(
        &mut bob,
        json!({"type": "joinRoom", "data": {"peerId": server.alice.id}}),
    )
    .await;
    let joined = expect_event(&mut bob, "roomJoined").await;
    assert_eq!(joined["data"]["room"], "pair:1:2");

    send(
        &mut alice,
        json!({"type": "sendDirectMessage", "data": {"receiverId": server.bob.id, "body": " hi bob "}}),
    )
    .await;

    let received = expect_event(&mut bob, "messageReceived").await;
    assert_eq!(received["data"]["message"]["body"], "hi bob");
    assert_eq!(received["data"]["message"]["senderName"], "alice");
    assert_eq!(received["data"]["message"]["isRead"], false);

    // The sender is not joined, so it gets its own copy back.
    let echoed = expect_event(&mut alice, "messageReceived").await;
    assert_eq!(echoed["data"]["message"]["id"], received["data"]["message"]["id"]);

    send(&mut alice, json!({"type": "ping"})).await;
    expect_event(&mut alice, "pong").await;
}

#[tokio::test]
async fn test_bearer_header_authenticates_on_upgrade() {
    let server = Server::start(Config::default()).await;

    let mut request = server.url().into_client_request().unwrap();
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", server.token(&server.alice))
            .parse()
            .unwrap(),
    );
    let (mut ws, _) = connect_async(request).await.unwrap();

    let greeting = next_event(&mut ws).await.unwrap();
    assert_eq!(greeting["type"], "authenticated");
    assert_eq!(greeting["data"]["identity"]["name"], "alice");
}

#[tokio::test]
async fn test_event_before_authentication_is_fatal() {
    let server = Server::start(Config::default()).await;
    let (mut ws, _) = connect_async(server.url()).await.unwrap();

    send(
        &mut ws,
        json!({"type": "sendDirectMessage", "data": {"receiverId": 2, "body": "sneaky"}}),
    )
    .await;
    let error = next_event(&mut ws).await.unwrap();
    assert_eq!(error["type"], "operationError");
    assert_eq!(error["data"]["code"], "unauthenticated");
    assert!(next_event(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_binary_frame_before_authentication_is_fatal() {
    let server = Server::start(Config::default()).await;
    let (mut ws, _) = connect_async(server.url()).await.unwrap();

    ws.send(Message::Binary(vec![0x01, 0x02, 0x03])).await.unwrap();
    let error = next_event(&mut ws).await.unwrap();
    assert_eq!(error["type"], "operationError");
    assert_eq!(error["data"]["code"], "unauthenticated");
    assert!(next_event(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_invalid_credential_is_fatal() {
    let server = Server::start(Config::default()).await;
    let (mut ws, _) = connect_async(server.url()).await.unwrap();

    send(
        &mut ws,
        json!({"type": "authenticate", "data": {"credential": "1.9999999999.deadbeef"}}),
    )
    .await;
    let error = next_event(&mut ws).await.unwrap();
    assert_eq!(error["data"]["code"], "unauthenticated");
    assert!(next_event(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_handshake_timeout_closes_connection() {
    let mut config = Config::default();
    config.gateway.handshake_timeout_secs = 1;
    let server = Server::start(config).await;
    let (mut ws, _) = connect_async(server.url()).await.unwrap();

    let error = next_event(&mut ws).await.unwrap();
    assert_eq!(error["data"]["code"], "unauthenticated");
    assert!(next_event(&mut ws).await.is_none());
}

#[tokio::test]
async fn test_malformed_frame_keeps_session() {
    let server = Server::start(Config::default()).await;
    let mut alice = server.login(&server.alice).await;

    alice
        .send(Message::Text("{\"type\": \"nonsense\"}".into()))
        .await
        .unwrap();
    let error = expect_event(&mut alice, "operationError").await;
    assert_eq!(error["data"]["code"], "invalidInput");

    send(&mut alice, json!({"type": "ping"})).await;
    expect_event(&mut alice, "pong").await;
}

#[tokio::test]
async fn test_max_connections_rejects_upgrade() {
    let mut config = Config::default();
    config.gateway.max_connections = 1;
    let server = Server::start(config).await;

    let _first = server.login(&server.alice).await;
    assert!(connect_async(server.url()).await.is_err());
}

#[tokio::test]
async fn test_presence_over_the_wire() {
    let server = Server::start(Config::default()).await;
    let mut alice = server.login(&server.alice).await;
    let bob = server.login(&server.bob).await;

    let online = expect_event(&mut alice, "presenceChanged").await;
    assert_eq!(online["data"]["user"]["id"], server.bob.id.get());
    assert_eq!(online["data"]["online"], true);

    drop(bob);
    let offline = expect_event(&mut alice, "presenceChanged").await;
    assert_eq!(offline["data"]["online"], false);
}
