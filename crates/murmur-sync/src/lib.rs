//! Murmur sync engine.
//!
//! Keeps a client's view of its chat rooms consistent across three sources:
//! - optimistic local commands (send, edit, delete, react)
//! - the request/response persistence backend
//! - the push gateway (echoes, peer edits, reactions, typing, presence)
//!
//! Start with [`SyncSession::builder`], drive the gateway with
//! [`transport::run`], then [`SyncSession::open_room`].

pub mod backend;
pub mod config;
pub mod delivery;
pub mod error;
pub mod gateway;
pub mod http;
pub mod mutation;
pub mod presence;
pub mod rate_limiter;
pub mod reactions;
pub mod room;
pub mod router;
pub mod session;
pub mod store;
pub mod timeline;
pub mod transport;
pub mod typing;

// Re-export key types for convenience.
pub use backend::{MessageBackend, PersistResponseExt};
pub use config::SyncConfig;
pub use delivery::{DeliveryEntry, DeliveryState};
pub use error::{Result, SyncError};
pub use gateway::{Gateway, GatewayLink, PresenceId};
pub use http::HttpBackend;
pub use presence::{PresenceRecord, PresenceTracker, PresenceWatch};
pub use room::{Room, RoomView};
pub use session::{SessionBuilder, SyncNotice, SyncSession};
pub use timeline::TimelineItem;
pub use transport::TransportConfig;
pub use typing::{TypingDebouncer, TypingState};
