//! Fablink messaging client.
//!
//! Client-side conversation state synchronizer for the fablink
//! marketplace: keeps a local cache of conversations and messages
//! consistent across REST fetches, optimistic local writes, and push
//! events from the messaging socket.

pub mod api_client;
pub mod client;
pub mod store;
pub mod typing;
pub mod ws;

pub use api_client::ApiClient;
pub use client::{ChatClient, RefreshConfig};
pub use store::{
    ConversationPhase, ConversationStore, LoadMode, PresenceTracker, SendState, StoreEffect,
    StoreUpdate, StoredMessage, TypingTracker,
};
pub use typing::{TypingEmitter, TYPING_IDLE_TIMEOUT};
pub use ws::{ConnectionState, ReconnectConfig, SocketConnection, SocketHandle};
