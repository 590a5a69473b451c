//! Sender-side typing debounce.
//!
//! The first keystroke emits `typing: true`; after 3 seconds without
//! further local keystrokes (or on an explicit stop, e.g. a send) the
//! emitter proactively sends `typing: false`. This is a UX debounce on the
//! sending side only; receivers trust explicit stop events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::ws::SocketHandle;

/// Idle window after the last keystroke before typing stops.
pub const TYPING_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct TypingState {
    last_activity: Instant,
    active: bool,
}

/// Emits typing start/stop signals for the local user.
#[derive(Clone)]
pub struct TypingEmitter {
    socket: SocketHandle,
    states: Arc<Mutex<HashMap<String, TypingState>>>,
    idle_timeout: Duration,
}

impl TypingEmitter {
    pub fn new(socket: SocketHandle) -> Self {
        Self::with_timeout(socket, TYPING_IDLE_TIMEOUT)
    }

    pub fn with_timeout(socket: SocketHandle, idle_timeout: Duration) -> Self {
        Self {
            socket,
            states: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Record a local keystroke in a conversation. Emits `typing: true` on
    /// the first keystroke of a burst and arms the idle watchdog.
    pub fn keystroke(&self, conversation_id: &str) {
        let mut states = self.states.lock().unwrap();
        let entry = states
            .entry(conversation_id.to_string())
            .or_insert_with(|| TypingState {
                last_activity: Instant::now(),
                active: false,
            });
        entry.last_activity = Instant::now();
        if entry.active {
            return;
        }
        entry.active = true;
        drop(states);

        self.socket.set_typing(conversation_id, true);
        self.spawn_watchdog(conversation_id.to_string());
    }

    /// Explicitly stop typing, e.g. when a message is sent.
    pub fn stop(&self, conversation_id: &str) {
        let mut states = self.states.lock().unwrap();
        let was_active = states
            .get_mut(conversation_id)
            .map(|entry| std::mem::replace(&mut entry.active, false))
            .unwrap_or(false);
        drop(states);
        if was_active {
            self.socket.set_typing(conversation_id, false);
        }
    }

    fn spawn_watchdog(&self, conversation_id: String) {
        let states = self.states.clone();
        let socket = self.socket.clone();
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            loop {
                let wait = {
                    let states = states.lock().unwrap();
                    match states.get(&conversation_id) {
                        Some(entry) if entry.active => {
                            let elapsed = entry.last_activity.elapsed();
                            if elapsed >= idle_timeout {
                                None
                            } else {
                                Some(idle_timeout - elapsed)
                            }
                        }
                        // Stopped explicitly (or discarded); nothing to do.
                        _ => return,
                    }
                };
                match wait {
                    Some(remaining) => tokio::time::sleep(remaining).await,
                    None => {
                        let should_emit = {
                            let mut states = states.lock().unwrap();
                            match states.get_mut(&conversation_id) {
                                Some(entry) if entry.active => {
                                    entry.active = false;
                                    true
                                }
                                _ => false,
                            }
                        };
                        if should_emit {
                            socket.set_typing(&conversation_id, false);
                        }
                        return;
                    }
                }
            }
        });
    }
}
