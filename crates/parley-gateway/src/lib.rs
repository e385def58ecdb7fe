//! Real-time messaging gateway for Parley.
//!
//! This crate provides:
//! - Presence tracking of connected identities
//! - Room-scoped fan-out to live connections
//! - The per-connection session state machine and chat operations
//! - Debounced typing indicators
//! - An axum WebSocket server with a small REST surface

pub mod api;
pub mod auth;
pub mod chat;
pub mod clock;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod rooms;
pub mod server;
pub mod session;
pub mod typing;

pub use auth::{AuthError, CredentialVerifier, SignedTokenVerifier, StaticTokenVerifier};
pub use chat::ChatService;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::GatewayError;
pub use presence::{ConnectionHandle, ConnectionId, PresenceChange, PresenceRegistry};
pub use protocol::{ClientEvent, ErrorCode, RoomTarget, ServerEvent};
pub use rooms::RoomRouter;
pub use server::{Gateway, GatewayState};
pub use session::{Flow, Session};
pub use typing::TypingDebouncer;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
