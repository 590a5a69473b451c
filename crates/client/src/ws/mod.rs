//! WebSocket connection to the messaging namespace, with state management
//! and auto-reconnect.
//!
//! The connection only relays: inbound events go to the `on_event` callback
//! and it never touches store state itself.

use fablink_shared::ClientCommand;
use futures_channel::mpsc::UnboundedSender;
use rand::Rng;

mod connection;
pub use connection::SocketConnection;

/// Connection state for the messaging socket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
        }
    }
}

impl ReconnectConfig {
    /// Delay for a given attempt number before jitter:
    /// `min(initial * 2^attempt, max)`.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> u64 {
        let shift = attempt.min(16);
        self.initial_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms)
    }

    /// Delay for a given attempt with up to 20% random jitter added, so
    /// reconnecting clients do not stampede the gateway in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let base = self.base_delay_for_attempt(attempt);
        let jitter = rand::thread_rng().gen_range(0..(base / 5).max(1));
        base + jitter
    }
}

/// Control messages fed into the connection loop.
#[derive(Debug, Clone)]
pub(crate) enum Control {
    /// Emit a command to the server (dropped, but membership-tracked, while
    /// disconnected).
    Emit(ClientCommand),
    /// Browser-style connectivity signal: back online, reconnect now.
    NetworkOnline,
    /// Browser-style connectivity signal: offline, tear down immediately.
    NetworkOffline,
    /// Explicit reconnect request (e.g. after the Failed state).
    Reconnect,
}

/// Handle for driving a [`SocketConnection`] from the outside.
#[derive(Clone)]
pub struct SocketHandle {
    sender: UnboundedSender<Control>,
}

impl SocketHandle {
    pub(crate) fn new(sender: UnboundedSender<Control>) -> Self {
        Self { sender }
    }

    fn send(&self, control: Control) {
        // The loop exiting just means the connection was shut down; commands
        // sent after that are intentionally ignored.
        let _ = self.sender.unbounded_send(control);
    }

    /// Join a conversation room. Membership is remembered and re-joined
    /// after every reconnect, since the transport loses subscriptions.
    pub fn join_conversation(&self, conversation_id: &str) {
        self.send(Control::Emit(ClientCommand::JoinConversation {
            conversation_id: conversation_id.to_string(),
        }));
    }

    /// Leave a conversation room.
    pub fn leave_conversation(&self, conversation_id: &str) {
        self.send(Control::Emit(ClientCommand::LeaveConversation {
            conversation_id: conversation_id.to_string(),
        }));
    }

    /// Emit a typing start/stop signal for a conversation.
    pub fn set_typing(&self, conversation_id: &str, is_typing: bool) {
        self.send(Control::Emit(ClientCommand::Typing {
            conversation_id: conversation_id.to_string(),
            is_typing,
        }));
    }

    /// Tell the server the current user has read a conversation.
    pub fn mark_as_read(&self, conversation_id: &str) {
        self.send(Control::Emit(ClientCommand::MarkAsRead {
            conversation_id: conversation_id.to_string(),
        }));
    }

    /// Relay an external "back online" signal: reconnect immediately if not
    /// already connected, resetting the attempt counter.
    pub fn network_online(&self) {
        self.send(Control::NetworkOnline);
    }

    /// Relay an external "offline" signal: mark disconnected right away
    /// instead of waiting for a read timeout.
    pub fn network_offline(&self) {
        self.send(Control::NetworkOffline);
    }

    /// Request a fresh connection attempt, e.g. after exhausting retries.
    pub fn connect(&self) {
        self.send(Control::Reconnect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_doubles_and_caps() {
        let config = ReconnectConfig::default();
        let mut previous = 0;
        for attempt in 0..12 {
            let delay = config.base_delay_for_attempt(attempt);
            assert!(delay >= previous, "delay regressed at attempt {attempt}");
            assert!(delay <= config.max_delay_ms);
            previous = delay;
        }
        assert_eq!(config.base_delay_for_attempt(0), 1000);
        assert_eq!(config.base_delay_for_attempt(1), 2000);
        assert_eq!(config.base_delay_for_attempt(4), 16000);
        assert_eq!(config.base_delay_for_attempt(5), 30000);
        assert_eq!(config.base_delay_for_attempt(11), 30000);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let config = ReconnectConfig::default();
        for _ in 0..200 {
            let delay = config.delay_for_attempt(0);
            assert!((1000..1200).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay_for_attempt(u32::MAX), 30000);
    }
}
