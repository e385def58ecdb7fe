//! Core types for Parley.

mod identifiers;
mod identity;
mod message;
mod reaction;
mod room;

pub use identifiers::*;
pub use identity::*;
pub use message::*;
pub use reaction::*;
pub use room::*;
