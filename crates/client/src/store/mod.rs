//! Client-side state stores.
//!
//! The conversation store is the single source of truth for conversations
//! and their messages; presence and typing are ephemeral push-driven state.

pub mod conversations;
pub mod presence;

pub use conversations::{
    ConversationMessages, ConversationPhase, ConversationStore, LoadMode, SendState, StoreEffect,
    StoreUpdate, StoredMessage,
};
pub use presence::{PresenceTracker, TypingTracker};
