//! Presence and typing state, driven entirely by push events.
//!
//! There is no REST presence endpoint; whatever the socket last reported
//! wins, and nothing here is persisted.

use std::collections::{HashMap, HashSet};

use fablink_shared::Presence;

/// Last-event-wins cache of per-user online state.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    users: HashMap<String, Presence>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, user_id: &str, presence: Presence) {
        self.users.insert(user_id.to_string(), presence);
    }

    pub fn get(&self, user_id: &str) -> Option<&Presence> {
        self.users.get(user_id)
    }

    /// Unknown users are offline.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(|p| p.is_online)
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}

/// Per-conversation sets of users currently flagged as typing.
///
/// Users enter on `typing: true` and leave on `typing: false`; the
/// receiving side trusts explicit stop events only. The 3-second idle
/// timeout lives on the sending side (see the typing emitter).
#[derive(Debug, Default)]
pub struct TypingTracker {
    conversations: HashMap<String, HashSet<String>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_typing(&mut self, conversation_id: &str, user_id: &str, is_typing: bool) {
        if is_typing {
            self.conversations
                .entry(conversation_id.to_string())
                .or_default()
                .insert(user_id.to_string());
        } else if let Some(set) = self.conversations.get_mut(conversation_id) {
            set.remove(user_id);
            if set.is_empty() {
                self.conversations.remove(conversation_id);
            }
        }
    }

    pub fn is_typing(&self, conversation_id: &str, user_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .is_some_and(|set| set.contains(user_id))
    }

    /// User IDs currently typing in a conversation.
    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        self.conversations
            .get(conversation_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn online() -> Presence {
        Presence {
            is_online: true,
            last_seen_at: None,
        }
    }

    fn offline() -> Presence {
        Presence {
            is_online: false,
            last_seen_at: DateTime::from_timestamp(1000, 0),
        }
    }

    #[test]
    fn last_event_wins() {
        let mut tracker = PresenceTracker::new();
        tracker.update("u1", online());
        assert!(tracker.is_online("u1"));
        tracker.update("u1", offline());
        assert!(!tracker.is_online("u1"));
        assert!(tracker.get("u1").unwrap().last_seen_at.is_some());
    }

    #[test]
    fn unknown_users_are_offline() {
        let tracker = PresenceTracker::new();
        assert!(!tracker.is_online("ghost"));
        assert!(tracker.get("ghost").is_none());
    }

    #[test]
    fn typing_tracks_explicit_start_and_stop_only() {
        let mut tracker = TypingTracker::new();
        tracker.set_typing("c1", "u1", true);
        tracker.set_typing("c1", "u2", true);
        assert!(tracker.is_typing("c1", "u1"));
        assert_eq!(tracker.typing_users("c1").len(), 2);

        tracker.set_typing("c1", "u1", false);
        assert!(!tracker.is_typing("c1", "u1"));
        assert!(tracker.is_typing("c1", "u2"));

        // Stop for someone who never started is a no-op.
        tracker.set_typing("c1", "u3", false);
        assert_eq!(tracker.typing_users("c1"), vec!["u2".to_string()]);
    }
}
