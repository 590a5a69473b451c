//! Wire models for the fablink marketplace messaging API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Identity ---

/// Snapshot of a user as embedded in conversations and messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// The two fixed participant roles of a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ParticipantRole {
    Customer,
    Supplier,
}

// --- Conversations ---

/// Preview of the most recent message, carried on the conversation itself
/// so lists can render without fetching message history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    pub sender_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A two-party thread between a customer and a supplier, optionally tied
/// to a manufacturing project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub customer: Option<UserSummary>,
    pub supplier: Option<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// None until the first message is sent; such conversations are
    /// provisional and hidden from lists.
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageSnapshot>,
    #[serde(default)]
    pub customer_unread_count: u32,
    #[serde(default)]
    pub supplier_unread_count: u32,
}

impl Conversation {
    pub fn participant(&self, role: ParticipantRole) -> Option<&UserSummary> {
        match role {
            ParticipantRole::Customer => self.customer.as_ref(),
            ParticipantRole::Supplier => self.supplier.as_ref(),
        }
    }

    /// Which side of the conversation the given user is on, if any.
    pub fn role_of(&self, user_id: &str) -> Option<ParticipantRole> {
        if self.customer.as_ref().is_some_and(|u| u.id == user_id) {
            Some(ParticipantRole::Customer)
        } else if self.supplier.as_ref().is_some_and(|u| u.id == user_id) {
            Some(ParticipantRole::Supplier)
        } else {
            None
        }
    }

    pub fn unread_for(&self, role: ParticipantRole) -> u32 {
        match role {
            ParticipantRole::Customer => self.customer_unread_count,
            ParticipantRole::Supplier => self.supplier_unread_count,
        }
    }

    pub fn set_unread(&mut self, role: ParticipantRole, count: u32) {
        match role {
            ParticipantRole::Customer => self.customer_unread_count = count,
            ParticipantRole::Supplier => self.supplier_unread_count = count,
        }
    }

    /// True when both participant records are populated and `user_id` is one
    /// of them. Provisional conversations (no message yet) are not visible.
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.customer.is_some()
            && self.supplier.is_some()
            && self.role_of(user_id).is_some()
            && self.last_message_at.is_some()
    }

    /// True when both conversations are between the same two users,
    /// regardless of role order.
    pub fn same_participant_pair(&self, other: &Conversation) -> bool {
        let ids = |c: &Conversation| {
            let a = c.customer.as_ref().map(|u| u.id.clone());
            let b = c.supplier.as_ref().map(|u| u.id.clone());
            (a, b)
        };
        let (a1, b1) = ids(self);
        let (a2, b2) = ids(other);
        if a1.is_none() || b1.is_none() || a2.is_none() || b2.is_none() {
            return false;
        }
        (a1 == a2 && b1 == b2) || (a1 == b2 && b1 == a2)
    }
}

// --- Messages ---

/// Rendering hint for a message body; does not change the transport shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    #[default]
    Text,
    Quote,
    ProjectNotification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: UserSummary,
    pub body: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    /// Delivery progression is one-way: sent -> delivered -> read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    pub fn snapshot(&self) -> MessageSnapshot {
        MessageSnapshot {
            sender_id: self.sender.id.clone(),
            body: self.body.clone(),
            created_at: self.created_at,
        }
    }
}

// --- Presence ---

/// Last-reported online state for a user. Entirely push-driven; there is
/// no REST presence endpoint to reconcile against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

// --- Pagination ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
}

/// One page of message history. The server returns items newest-first;
/// callers reverse to ascending before display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesPage {
    pub items: Vec<Message>,
    pub page: PageInfo,
}

// --- Request/Response Types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub other_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub total: u32,
}

// --- WebSocket ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Commands the client emits on the messaging namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    JoinConversation {
        conversation_id: String,
    },
    LeaveConversation {
        conversation_id: String,
    },
    Typing {
        conversation_id: String,
        is_typing: bool,
    },
    MarkAsRead {
        conversation_id: String,
    },
}

/// Push events delivered by the messaging namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    NewMessage {
        conversation_id: String,
        message: Message,
    },
    ConversationUpdate {
        conversation: Conversation,
    },
    MessageDelivered {
        conversation_id: String,
        message_id: String,
        delivered_at: DateTime<Utc>,
    },
    MessageRead {
        conversation_id: String,
        message_id: String,
        read_at: DateTime<Utc>,
    },
    UserOnlineStatus {
        user_id: String,
        is_online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    },
    Typing {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
}
