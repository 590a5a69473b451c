//! Conversation state store.
//!
//! Reconciles three independent input streams (REST fetches, optimistic
//! local actions, and push events) into one consistent view. Every
//! mutation goes through [`ConversationStore::apply`], so the reduction
//! order of interleaved callbacks is explicit rather than incidental
//! event-loop timing. Idempotency (dedup by ID) does the work that locks
//! would do elsewhere.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fablink_shared::{Conversation, Message};

/// Local delivery phase of an optimistically sent message. A failed send
/// stays visible and distinguishable so the caller can retry or discard it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Pending,
    Confirmed,
    Failed,
}

/// A message as cached by the store, with its local send phase.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub message: Message,
    pub send_state: SendState,
}

impl StoredMessage {
    pub fn confirmed(message: Message) -> Self {
        Self {
            message,
            send_state: SendState::Confirmed,
        }
    }

    pub fn pending(message: Message) -> Self {
        Self {
            message,
            send_state: SendState::Pending,
        }
    }
}

/// Cached messages for a single conversation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConversationMessages {
    /// All cached messages, sorted by created_at ascending.
    pub messages: Vec<StoredMessage>,
    /// Whether history has been fetched from the REST API this session.
    pub is_loaded: bool,
}

impl ConversationMessages {
    /// Add a message at its sorted position by creation timestamp.
    /// Returns false if a message with the same ID already exists: the
    /// same message can arrive via optimistic insert and again via push
    /// event, or twice via push on reconnect.
    pub fn add_message(&mut self, msg: StoredMessage) -> bool {
        if self.messages.iter().any(|m| m.message.id == msg.message.id) {
            return false;
        }

        let pos = self
            .messages
            .binary_search_by(|m| m.message.created_at.cmp(&msg.message.created_at))
            .unwrap_or_else(|pos| pos);

        self.messages.insert(pos, msg);
        true
    }

    /// Replace the cache with a freshly fetched history page and mark the
    /// conversation loaded.
    pub fn set_history(&mut self, history: Vec<Message>) {
        self.messages.clear();
        for message in history {
            self.add_message(StoredMessage::confirmed(message));
        }
        self.is_loaded = true;
    }

    /// Merge a fetched page into the cache. Existing entries win (their
    /// local send state is preserved); receipt fields are upgraded one-way.
    pub fn merge_history(&mut self, fetched: Vec<Message>) {
        for message in fetched {
            if let Some(existing) = self.find_mut(&message.id) {
                if existing.message.delivered_at.is_none() {
                    existing.message.delivered_at = message.delivered_at;
                }
                if existing.message.read_at.is_none() {
                    existing.message.read_at = message.read_at;
                }
                existing.send_state = SendState::Confirmed;
            } else {
                self.add_message(StoredMessage::confirmed(message));
            }
        }
        self.is_loaded = true;
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.message.id == message_id)
    }

    pub fn find_mut(&mut self, message_id: &str) -> Option<&mut StoredMessage> {
        self.messages.iter_mut().find(|m| m.message.id == message_id)
    }

    fn remove(&mut self, message_id: &str) -> Option<StoredMessage> {
        let pos = self.messages.iter().position(|m| m.message.id == message_id)?;
        Some(self.messages.remove(pos))
    }
}

/// How a fetched message page is applied to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Forced reload: discard the cache and install the fetched page.
    Replace,
    /// Append to the cache, dedup by ID, keep ascending order.
    Merge,
}

/// Per-conversation lifecycle from the current user's viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    /// No message yet; hidden from lists.
    Unlisted,
    /// Visible with unread messages.
    Active,
    /// Visible, fully read.
    Read,
}

/// A mutation request. REST results, optimistic actions, and push events
/// are all expressed as updates and reduced in arrival order.
#[derive(Debug, Clone)]
pub enum StoreUpdate {
    ConversationsLoaded(Vec<Conversation>),
    MessagesLoaded {
        conversation_id: String,
        messages: Vec<Message>,
        mode: LoadMode,
    },
    IncomingMessage {
        message: Message,
    },
    MarkedRead {
        conversation_id: String,
    },
    SendStarted {
        message: Message,
    },
    SendSucceeded {
        temp_id: String,
        message: Message,
    },
    SendFailed {
        conversation_id: String,
        temp_id: String,
    },
    SendRetried {
        conversation_id: String,
        temp_id: String,
    },
    FailedSendDiscarded {
        conversation_id: String,
        temp_id: String,
    },
    DeliveryReceipt {
        conversation_id: String,
        message_id: String,
        delivered_at: DateTime<Utc>,
    },
    ReadReceipt {
        conversation_id: String,
        message_id: String,
        read_at: DateTime<Utc>,
    },
    ConversationUpserted(Conversation),
    UnreadTotal(u32),
}

/// Follow-up work an update asks its caller to do. The store itself never
/// performs I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEffect {
    /// A push event referenced a conversation the store does not know;
    /// the list should be refetched.
    RefreshConversations,
}

/// Single source of truth for conversations and their messages, for one
/// signed-in user. Constructed with its dependencies injected; holds no
/// ambient/global state.
#[derive(Debug)]
pub struct ConversationStore {
    current_user_id: String,
    /// Sorted by last_message_at descending.
    conversations: Vec<Conversation>,
    messages: HashMap<String, ConversationMessages>,
    total_unread: u32,
}

impl ConversationStore {
    pub fn new(current_user_id: impl Into<String>) -> Self {
        Self {
            current_user_id: current_user_id.into(),
            conversations: Vec::new(),
            messages: HashMap::new(),
            total_unread: 0,
        }
    }

    /// Reduce one mutation request into the store.
    pub fn apply(&mut self, update: StoreUpdate) -> Vec<StoreEffect> {
        match update {
            StoreUpdate::ConversationsLoaded(list) => {
                self.conversations_loaded(list);
                Vec::new()
            }
            StoreUpdate::MessagesLoaded {
                conversation_id,
                messages,
                mode,
            } => {
                let entry = self.messages.entry(conversation_id).or_default();
                match mode {
                    LoadMode::Replace => entry.set_history(messages),
                    LoadMode::Merge => entry.merge_history(messages),
                }
                Vec::new()
            }
            StoreUpdate::IncomingMessage { message } => self.incoming_message(message),
            StoreUpdate::MarkedRead { conversation_id } => {
                self.marked_read(&conversation_id);
                Vec::new()
            }
            StoreUpdate::SendStarted { message } => {
                self.messages
                    .entry(message.conversation_id.clone())
                    .or_default()
                    .add_message(StoredMessage::pending(message));
                Vec::new()
            }
            StoreUpdate::SendSucceeded { temp_id, message } => {
                self.send_succeeded(&temp_id, message);
                Vec::new()
            }
            StoreUpdate::SendFailed {
                conversation_id,
                temp_id,
            } => {
                self.set_send_state(&conversation_id, &temp_id, SendState::Failed);
                Vec::new()
            }
            StoreUpdate::SendRetried {
                conversation_id,
                temp_id,
            } => {
                self.set_send_state(&conversation_id, &temp_id, SendState::Pending);
                Vec::new()
            }
            StoreUpdate::FailedSendDiscarded {
                conversation_id,
                temp_id,
            } => {
                if let Some(entry) = self.messages.get_mut(&conversation_id) {
                    let failed = entry
                        .find_mut(&temp_id)
                        .is_some_and(|m| m.send_state == SendState::Failed);
                    if failed {
                        entry.remove(&temp_id);
                    }
                }
                Vec::new()
            }
            StoreUpdate::DeliveryReceipt {
                conversation_id,
                message_id,
                delivered_at,
            } => {
                if let Some(entry) = self.messages.get_mut(&conversation_id) {
                    if let Some(stored) = entry.find_mut(&message_id) {
                        if stored.message.delivered_at.is_none() {
                            stored.message.delivered_at = Some(delivered_at);
                        }
                    }
                }
                Vec::new()
            }
            StoreUpdate::ReadReceipt {
                conversation_id,
                message_id,
                read_at,
            } => {
                if let Some(entry) = self.messages.get_mut(&conversation_id) {
                    if let Some(stored) = entry.find_mut(&message_id) {
                        if stored.message.delivered_at.is_none() {
                            stored.message.delivered_at = Some(read_at);
                        }
                        if stored.message.read_at.is_none() {
                            stored.message.read_at = Some(read_at);
                        }
                    }
                }
                Vec::new()
            }
            StoreUpdate::ConversationUpserted(conversation) => {
                self.conversation_upserted(conversation);
                Vec::new()
            }
            StoreUpdate::UnreadTotal(total) => {
                self.total_unread = total;
                Vec::new()
            }
        }
    }

    // --- Accessors ---

    /// Every conversation the store knows, including provisional ones kept
    /// so a just-created thread can be opened before its first message.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Conversations that pass the visibility filter: both participants
    /// populated, the current user is one of them, at least one message.
    pub fn visible_conversations(&self) -> Vec<&Conversation> {
        self.conversations
            .iter()
            .filter(|c| c.is_visible_to(&self.current_user_id))
            .collect()
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    /// Cached messages, ascending by creation timestamp. Empty when the
    /// conversation has not been loaded.
    pub fn messages(&self, conversation_id: &str) -> &[StoredMessage] {
        self.messages
            .get(conversation_id)
            .map(|m| m.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Whether history has been fetched this session; revisiting a loaded
    /// conversation must not refetch unless forced.
    pub fn is_loaded(&self, conversation_id: &str) -> bool {
        self.messages
            .get(conversation_id)
            .is_some_and(|m| m.is_loaded)
    }

    pub fn total_unread(&self) -> u32 {
        self.total_unread
    }

    pub fn current_user_id(&self) -> &str {
        &self.current_user_id
    }

    pub fn phase(&self, conversation_id: &str) -> Option<ConversationPhase> {
        let conv = self.conversation(conversation_id)?;
        if conv.last_message_at.is_none() {
            return Some(ConversationPhase::Unlisted);
        }
        let unread = conv
            .role_of(&self.current_user_id)
            .map_or(0, |role| conv.unread_for(role));
        Some(if unread > 0 {
            ConversationPhase::Active
        } else {
            ConversationPhase::Read
        })
    }

    // --- Reduction arms ---

    fn conversations_loaded(&mut self, list: Vec<Conversation>) {
        // Dedup by ID keeping the last occurrence; hide provisional and
        // dangling entries.
        let mut by_id: HashMap<String, Conversation> = HashMap::new();
        for conversation in list {
            if conversation.is_visible_to(&self.current_user_id) {
                by_id.insert(conversation.id.clone(), conversation);
            }
        }
        self.conversations = by_id.into_values().collect();
        self.sort_conversations();
        self.recompute_total_unread();
    }

    fn incoming_message(&mut self, message: Message) -> Vec<StoreEffect> {
        let conversation_id = message.conversation_id.clone();
        let inserted = self
            .messages
            .entry(conversation_id.clone())
            .or_default()
            .add_message(StoredMessage::confirmed(message.clone()));
        if !inserted {
            // Duplicate delivery: optimistic insert raced the push event,
            // or the event was replayed on reconnect.
            return Vec::new();
        }

        let sender_is_me = message.sender.id == self.current_user_id;
        let mut known = false;
        let mut bump_unread = false;
        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            known = true;
            if conv.last_message_at.is_none_or(|t| t <= message.created_at) {
                conv.last_message_at = Some(message.created_at);
                conv.last_message = Some(message.snapshot());
            }
            // Self-authored messages never count as unread for oneself.
            if !sender_is_me {
                if let Some(role) = conv.role_of(&self.current_user_id) {
                    let count = conv.unread_for(role);
                    conv.set_unread(role, count + 1);
                    bump_unread = true;
                }
            }
        }

        if bump_unread {
            self.total_unread += 1;
        }
        if known {
            self.sort_conversations();
            Vec::new()
        } else {
            vec![StoreEffect::RefreshConversations]
        }
    }

    fn marked_read(&mut self, conversation_id: &str) {
        let mut zeroed = 0;
        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            if let Some(role) = conv.role_of(&self.current_user_id) {
                zeroed = conv.unread_for(role);
                conv.set_unread(role, 0);
            }
        }
        // Clamped: a racing summary fetch may already have lowered it.
        self.total_unread = self.total_unread.saturating_sub(zeroed);
    }

    fn send_succeeded(&mut self, temp_id: &str, message: Message) {
        let conversation_id = message.conversation_id.clone();
        let entry = self.messages.entry(conversation_id.clone()).or_default();
        entry.remove(temp_id);
        if let Some(existing) = entry.find_mut(&message.id) {
            // The push event for this message landed first; don't duplicate.
            existing.send_state = SendState::Confirmed;
        } else {
            entry.add_message(StoredMessage::confirmed(message.clone()));
        }

        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            if conv.last_message_at.is_none_or(|t| t <= message.created_at) {
                conv.last_message_at = Some(message.created_at);
                conv.last_message = Some(message.snapshot());
            }
        }
        self.sort_conversations();
    }

    fn set_send_state(&mut self, conversation_id: &str, temp_id: &str, state: SendState) {
        if let Some(entry) = self.messages.get_mut(conversation_id) {
            if let Some(stored) = entry.find_mut(temp_id) {
                stored.send_state = state;
            }
        }
    }

    fn conversation_upserted(&mut self, conversation: Conversation) {
        // Precedence: exact ID, then same participant pair in either order
        // (the server reuses threads per pair), otherwise a new entry.
        if let Some(pos) = self
            .conversations
            .iter()
            .position(|c| c.id == conversation.id)
        {
            self.conversations[pos] = conversation;
        } else if let Some(pos) = self
            .conversations
            .iter()
            .position(|c| c.same_participant_pair(&conversation))
        {
            self.conversations[pos] = conversation;
        } else {
            self.conversations.insert(0, conversation);
        }
        self.recompute_total_unread();
    }

    fn sort_conversations(&mut self) {
        self.conversations
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    }

    fn recompute_total_unread(&mut self) {
        self.total_unread = self
            .conversations
            .iter()
            .filter(|c| c.is_visible_to(&self.current_user_id))
            .map(|c| {
                c.role_of(&self.current_user_id)
                    .map_or(0, |role| c.unread_for(role))
            })
            .sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fablink_shared::{MessageKind, UserSummary};

    fn user(id: &str) -> UserSummary {
        UserSummary {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            avatar: None,
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn conversation(id: &str, customer: &str, supplier: &str, last_at: Option<i64>) -> Conversation {
        Conversation {
            id: id.to_string(),
            customer: Some(user(customer)),
            supplier: Some(user(supplier)),
            project_id: None,
            last_message_at: last_at.map(ts),
            last_message: None,
            customer_unread_count: 0,
            supplier_unread_count: 0,
        }
    }

    fn message(id: &str, conversation_id: &str, sender: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender: user(sender),
            body: format!("body of {id}"),
            kind: MessageKind::Text,
            created_at: ts(secs),
            delivered_at: None,
            read_at: None,
        }
    }

    fn store_with_conversation() -> ConversationStore {
        // Current user "cust" is the customer of conversation c1 with
        // supplier "supp".
        let mut store = ConversationStore::new("cust");
        store.apply(StoreUpdate::ConversationsLoaded(vec![conversation(
            "c1",
            "cust",
            "supp",
            Some(100),
        )]));
        store
    }

    #[test]
    fn duplicate_incoming_messages_are_inserted_once() {
        let mut store = store_with_conversation();
        let m = message("m1", "c1", "supp", 200);
        store.apply(StoreUpdate::IncomingMessage { message: m.clone() });
        store.apply(StoreUpdate::IncomingMessage { message: m });
        assert_eq!(store.messages("c1").len(), 1);
        // The counter must not double-bump either.
        assert_eq!(store.total_unread(), 1);
    }

    #[test]
    fn out_of_order_arrivals_are_sorted_by_timestamp() {
        let mut store = store_with_conversation();
        store.apply(StoreUpdate::IncomingMessage {
            message: message("m1", "c1", "supp", 100),
        });
        store.apply(StoreUpdate::IncomingMessage {
            message: message("m2", "c1", "supp", 50),
        });
        let ids: Vec<&str> = store
            .messages("c1")
            .iter()
            .map(|m| m.message.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m2", "m1"]);
        // The late-but-older message must not regress the snapshot.
        assert_eq!(store.conversation("c1").unwrap().last_message_at, Some(ts(100)));
    }

    #[test]
    fn optimistic_send_and_push_event_dedup_to_one_entry() {
        let mut store = store_with_conversation();
        let pending = message("abc", "c1", "cust", 300);
        store.apply(StoreUpdate::SendStarted {
            message: pending.clone(),
        });
        // The push event for the confirmed message arrives before the
        // gateway call resolves.
        store.apply(StoreUpdate::IncomingMessage {
            message: pending.clone(),
        });
        store.apply(StoreUpdate::SendSucceeded {
            temp_id: "abc".to_string(),
            message: pending,
        });
        let messages = store.messages("c1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.id, "abc");
        assert_eq!(messages[0].send_state, SendState::Confirmed);
    }

    #[test]
    fn confirmed_send_replaces_the_temp_entry() {
        let mut store = store_with_conversation();
        let temp = message("temp-1", "c1", "cust", 300);
        store.apply(StoreUpdate::SendStarted { message: temp });
        let confirmed = message("srv-9", "c1", "cust", 301);
        store.apply(StoreUpdate::SendSucceeded {
            temp_id: "temp-1".to_string(),
            message: confirmed.clone(),
        });
        // Push delivery of the same confirmed message is a no-op.
        store.apply(StoreUpdate::IncomingMessage { message: confirmed });
        let messages = store.messages("c1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.id, "srv-9");
    }

    #[test]
    fn self_authored_messages_never_count_unread() {
        let mut store = store_with_conversation();
        store.apply(StoreUpdate::IncomingMessage {
            message: message("m1", "c1", "cust", 200),
        });
        assert_eq!(store.total_unread(), 0);
        assert_eq!(store.conversation("c1").unwrap().customer_unread_count, 0);
    }

    #[test]
    fn unread_accounting_tracks_messages_and_mark_read() {
        let mut store = store_with_conversation();
        for (id, secs) in [("m1", 200), ("m2", 201), ("m3", 202)] {
            store.apply(StoreUpdate::IncomingMessage {
                message: message(id, "c1", "supp", secs),
            });
        }
        assert_eq!(store.conversation("c1").unwrap().customer_unread_count, 3);
        assert_eq!(store.total_unread(), 3);
        assert_eq!(store.phase("c1"), Some(ConversationPhase::Active));

        store.apply(StoreUpdate::MarkedRead {
            conversation_id: "c1".to_string(),
        });
        assert_eq!(store.conversation("c1").unwrap().customer_unread_count, 0);
        assert_eq!(store.total_unread(), 0);
        assert_eq!(store.phase("c1"), Some(ConversationPhase::Read));
    }

    #[test]
    fn mark_read_clamps_the_global_total_at_zero() {
        let mut store = store_with_conversation();
        store.apply(StoreUpdate::IncomingMessage {
            message: message("m1", "c1", "supp", 200),
        });
        // A racing summary fetch already lowered the total.
        store.apply(StoreUpdate::UnreadTotal(0));
        store.apply(StoreUpdate::MarkedRead {
            conversation_id: "c1".to_string(),
        });
        assert_eq!(store.total_unread(), 0);
    }

    #[test]
    fn visibility_filter_hides_provisional_and_foreign_conversations() {
        let mut store = ConversationStore::new("cust");
        let mut dangling = conversation("c3", "cust", "supp", Some(10));
        dangling.supplier = None;
        store.apply(StoreUpdate::ConversationsLoaded(vec![
            conversation("c1", "cust", "supp", Some(100)), // visible
            conversation("c2", "cust", "supp", None),      // provisional
            dangling,                                      // missing participant
            conversation("c4", "alice", "bob", Some(50)),  // not a participant
        ]));
        let visible: Vec<&str> = store
            .visible_conversations()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(visible, vec!["c1"]);
    }

    #[test]
    fn loading_dedups_by_id_keeping_the_last_occurrence() {
        let mut store = ConversationStore::new("cust");
        let mut newer = conversation("c1", "cust", "supp", Some(100));
        newer.customer_unread_count = 5;
        store.apply(StoreUpdate::ConversationsLoaded(vec![
            conversation("c1", "cust", "supp", Some(90)),
            newer,
        ]));
        assert_eq!(store.conversations().len(), 1);
        assert_eq!(store.conversation("c1").unwrap().customer_unread_count, 5);
        assert_eq!(store.total_unread(), 5);
    }

    #[test]
    fn loading_recomputes_the_total_for_the_users_role() {
        let mut store = ConversationStore::new("supp");
        let mut c1 = conversation("c1", "cust", "supp", Some(100));
        c1.customer_unread_count = 7;
        c1.supplier_unread_count = 2;
        let mut c2 = conversation("c2", "other", "supp", Some(90));
        c2.supplier_unread_count = 4;
        store.apply(StoreUpdate::ConversationsLoaded(vec![c1, c2]));
        assert_eq!(store.total_unread(), 6);
    }

    #[test]
    fn duplicate_pair_creation_does_not_grow_the_list() {
        let mut store = store_with_conversation();
        // The server returns the existing thread for the same pair, under
        // a different snapshot each time.
        let first = conversation("c1", "cust", "supp", Some(100));
        store.apply(StoreUpdate::ConversationUpserted(first));
        // Same pair, roles flipped, different ID: still reconciled in place.
        let flipped = conversation("c-dup", "supp", "cust", Some(100));
        store.apply(StoreUpdate::ConversationUpserted(flipped));
        assert_eq!(store.conversations().len(), 1);
    }

    #[test]
    fn unknown_conversation_upsert_is_prepended() {
        let mut store = store_with_conversation();
        store.apply(StoreUpdate::ConversationUpserted(conversation(
            "c-new", "cust", "acme", None,
        )));
        assert_eq!(store.conversations().len(), 2);
        assert_eq!(store.conversations()[0].id, "c-new");
        assert_eq!(store.phase("c-new"), Some(ConversationPhase::Unlisted));
        // Provisional: not visible until the first message lands.
        assert_eq!(store.visible_conversations().len(), 1);
    }

    #[test]
    fn receipts_are_one_way_upgrades() {
        let mut store = store_with_conversation();
        store.apply(StoreUpdate::IncomingMessage {
            message: message("m1", "c1", "cust", 200),
        });
        store.apply(StoreUpdate::ReadReceipt {
            conversation_id: "c1".to_string(),
            message_id: "m1".to_string(),
            read_at: ts(210),
        });
        // A late delivery receipt must not regress the read state.
        store.apply(StoreUpdate::DeliveryReceipt {
            conversation_id: "c1".to_string(),
            message_id: "m1".to_string(),
            delivered_at: ts(205),
        });
        let stored = &store.messages("c1")[0];
        assert_eq!(stored.message.read_at, Some(ts(210)));
        assert_eq!(stored.message.delivered_at, Some(ts(210)));
    }

    #[test]
    fn replace_and_merge_load_modes() {
        let mut store = store_with_conversation();
        store.apply(StoreUpdate::MessagesLoaded {
            conversation_id: "c1".to_string(),
            messages: vec![message("m2", "c1", "supp", 60), message("m1", "c1", "supp", 50)],
            mode: LoadMode::Replace,
        });
        assert!(store.is_loaded("c1"));
        assert_eq!(store.messages("c1").len(), 2);

        // Merging an older page keeps existing entries and sorts ascending.
        store.apply(StoreUpdate::MessagesLoaded {
            conversation_id: "c1".to_string(),
            messages: vec![message("m0", "c1", "cust", 40), message("m1", "c1", "supp", 50)],
            mode: LoadMode::Merge,
        });
        let ids: Vec<&str> = store
            .messages("c1")
            .iter()
            .map(|m| m.message.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn failed_sends_can_be_retried_or_discarded() {
        let mut store = store_with_conversation();
        store.apply(StoreUpdate::SendStarted {
            message: message("tmp", "c1", "cust", 300),
        });
        store.apply(StoreUpdate::SendFailed {
            conversation_id: "c1".to_string(),
            temp_id: "tmp".to_string(),
        });
        assert_eq!(store.messages("c1")[0].send_state, SendState::Failed);

        store.apply(StoreUpdate::SendRetried {
            conversation_id: "c1".to_string(),
            temp_id: "tmp".to_string(),
        });
        assert_eq!(store.messages("c1")[0].send_state, SendState::Pending);

        store.apply(StoreUpdate::SendFailed {
            conversation_id: "c1".to_string(),
            temp_id: "tmp".to_string(),
        });
        store.apply(StoreUpdate::FailedSendDiscarded {
            conversation_id: "c1".to_string(),
            temp_id: "tmp".to_string(),
        });
        assert!(store.messages("c1").is_empty());
    }

    #[test]
    fn incoming_message_for_unknown_conversation_requests_a_refresh() {
        let mut store = store_with_conversation();
        let effects = store.apply(StoreUpdate::IncomingMessage {
            message: message("m1", "c-unknown", "supp", 200),
        });
        assert_eq!(effects, vec![StoreEffect::RefreshConversations]);
        // The message itself is cached so nothing is lost once the
        // conversation list catches up.
        assert_eq!(store.messages("c-unknown").len(), 1);
    }

    #[test]
    fn conversation_list_stays_sorted_by_recency() {
        let mut store = ConversationStore::new("cust");
        store.apply(StoreUpdate::ConversationsLoaded(vec![
            conversation("old", "cust", "supp", Some(100)),
            conversation("new", "cust", "acme", Some(200)),
        ]));
        assert_eq!(store.conversations()[0].id, "new");

        store.apply(StoreUpdate::IncomingMessage {
            message: message("m1", "old", "supp", 300),
        });
        assert_eq!(store.conversations()[0].id, "old");
    }
}
