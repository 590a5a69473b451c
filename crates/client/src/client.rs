//! Chat client: composes the gateway, the socket connection, and the
//! stores into one conversation state synchronizer.
//!
//! All dependencies are injected through the constructor; nothing here is
//! global. Push events and REST results are funneled through the store's
//! reducer in arrival order, and no public operation panics across the
//! caller boundary: everything returns `Result<_, ApiError>`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use fablink_shared::{
    ApiError, Conversation, Message, MessageKind, Presence, ServerEvent, UserSummary, WsEnvelope,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api_client::ApiClient;
use crate::store::{
    ConversationStore, LoadMode, PresenceTracker, SendState, StoreEffect, StoreUpdate,
    TypingTracker,
};
use crate::typing::TypingEmitter;
use crate::ws::{ConnectionState, ReconnectConfig, SocketConnection, SocketHandle};

/// Windows governing conversation list refreshes.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Minimum interval between forced refreshes.
    pub min_forced_interval: Duration,
    /// Coalescing window for non-forced refresh triggers.
    pub debounce: Duration,
    /// Delay before the corrective refresh after creating a conversation.
    pub post_create_delay: Duration,
    /// Message page size for history fetches.
    pub page_size: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_forced_interval: Duration::from_secs(1),
            debounce: Duration::from_millis(500),
            post_create_delay: Duration::from_millis(1500),
            page_size: 50,
        }
    }
}

/// State shared between the client and its socket event callback.
struct Shared {
    store: Mutex<ConversationStore>,
    presence: Mutex<PresenceTracker>,
    typing: Mutex<TypingTracker>,
    /// Sequence guard: a fetch result is dropped if a newer fetch started
    /// after it, so a stale slow response cannot overwrite a fast one.
    fetch_seq: AtomicU64,
    debounce_pending: AtomicBool,
    last_forced: Mutex<Option<tokio::time::Instant>>,
}

impl Shared {
    fn new(current_user_id: &str) -> Self {
        Self {
            store: Mutex::new(ConversationStore::new(current_user_id)),
            presence: Mutex::new(PresenceTracker::new()),
            typing: Mutex::new(TypingTracker::new()),
            fetch_seq: AtomicU64::new(0),
            debounce_pending: AtomicBool::new(false),
            last_forced: Mutex::new(None),
        }
    }
}

/// The conversation state synchronizer for one signed-in user.
pub struct ChatClient {
    api: ApiClient,
    socket: SocketConnection,
    handle: SocketHandle,
    shared: Arc<Shared>,
    current_user: UserSummary,
    typing_emitter: TypingEmitter,
    refresh: RefreshConfig,
}

impl ChatClient {
    /// Create a client and start connecting. `url_builder` is called before
    /// every socket attempt so a refreshed credential is picked up;
    /// returning `None` leaves the socket silently disconnected and the
    /// client working from cached/REST data only.
    pub fn new(
        api: ApiClient,
        current_user: UserSummary,
        url_builder: impl Fn() -> Option<String> + Send + Sync + 'static,
        reconnect: ReconnectConfig,
        refresh: RefreshConfig,
    ) -> Self {
        let shared = Arc::new(Shared::new(&current_user.id));

        let shared_cb = shared.clone();
        let api_cb = api.clone();
        let refresh_cb = refresh.clone();
        let on_event = move |envelope: WsEnvelope<ServerEvent>| {
            dispatch(&shared_cb, &api_cb, &refresh_cb, envelope.payload);
        };

        let socket = SocketConnection::new(url_builder, on_event, reconnect);
        let handle = socket.handle();
        let typing_emitter = TypingEmitter::new(handle.clone());

        Self {
            api,
            socket,
            handle,
            shared,
            current_user,
            typing_emitter,
            refresh,
        }
    }

    /// Initial sign-in load: conversation list plus the server's unread
    /// summary.
    pub async fn start(&self) -> Result<(), ApiError> {
        self.refresh_conversations(true).await?;
        let summary = self.api.unread_count().await?;
        self.shared
            .store
            .lock()
            .unwrap()
            .apply(StoreUpdate::UnreadTotal(summary.total));
        Ok(())
    }

    // --- Conversation list ---

    /// Refresh the conversation list. Forced refreshes are throttled to one
    /// per second; non-forced triggers are debounced and coalesced.
    pub async fn refresh_conversations(&self, forced: bool) -> Result<(), ApiError> {
        refresh_conversations(&self.shared, &self.api, &self.refresh, forced).await
    }

    /// Open (or fetch the existing) conversation with another user,
    /// optionally scoped to a project. The result is reconciled against the
    /// cached set so the same pair never shows up twice; a short delayed
    /// refresh corrects any transient inconsistency.
    pub async fn create_conversation(
        &self,
        other_user_id: &str,
        project_id: Option<&str>,
    ) -> Result<Conversation, ApiError> {
        let conversation = self.api.create_conversation(other_user_id, project_id).await?;
        self.shared
            .store
            .lock()
            .unwrap()
            .apply(StoreUpdate::ConversationUpserted(conversation.clone()));

        let shared = self.shared.clone();
        let api = self.api.clone();
        let refresh = self.refresh.clone();
        tokio::spawn(async move {
            tokio::time::sleep(refresh.post_create_delay).await;
            if let Err(e) = refresh_conversations(&shared, &api, &refresh, true).await {
                warn!("post-create refresh failed: {e}");
            }
        });

        Ok(conversation)
    }

    // --- Messages ---

    /// Enter a conversation: join its socket room, fetch history if it has
    /// not been loaded this session, and mark it read.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.handle.join_conversation(conversation_id);
        let loaded = self.shared.store.lock().unwrap().is_loaded(conversation_id);
        if !loaded {
            self.load_messages(conversation_id, None, LoadMode::Replace)
                .await?;
        }
        self.mark_read(conversation_id).await
    }

    /// Leave a conversation's socket room (e.g. when navigating away).
    pub fn close_conversation(&self, conversation_id: &str) {
        self.typing_emitter.stop(conversation_id);
        self.handle.leave_conversation(conversation_id);
    }

    /// Fetch one page of history and apply it. Returns the cursor for the
    /// next (older) page, if any.
    pub async fn load_messages(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        mode: LoadMode,
    ) -> Result<Option<String>, ApiError> {
        let page = self
            .api
            .list_messages(conversation_id, cursor, self.refresh.page_size)
            .await?;
        // Server pages are newest-first; the store wants ascending.
        let mut messages = page.items;
        messages.reverse();
        self.shared.store.lock().unwrap().apply(StoreUpdate::MessagesLoaded {
            conversation_id: conversation_id.to_string(),
            messages,
            mode,
        });
        Ok(page.page.next_cursor)
    }

    /// Send a message with an optimistic local echo. On failure the local
    /// entry is tagged failed (no rollback) and the error is returned for
    /// the caller to surface.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        body: &str,
    ) -> Result<Message, ApiError> {
        if body.trim().is_empty() {
            return Err(ApiError::Validation("message body is empty".to_string()));
        }
        self.typing_emitter.stop(conversation_id);

        let temp_id = format!("local-{}", uuid::Uuid::new_v4());
        let pending = Message {
            id: temp_id.clone(),
            conversation_id: conversation_id.to_string(),
            sender: self.current_user.clone(),
            body: body.to_string(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        };
        self.shared
            .store
            .lock()
            .unwrap()
            .apply(StoreUpdate::SendStarted { message: pending });

        match self.api.send_message(conversation_id, body).await {
            Ok(confirmed) => {
                self.shared.store.lock().unwrap().apply(StoreUpdate::SendSucceeded {
                    temp_id,
                    message: confirmed.clone(),
                });
                Ok(confirmed)
            }
            Err(e) => {
                self.shared.store.lock().unwrap().apply(StoreUpdate::SendFailed {
                    conversation_id: conversation_id.to_string(),
                    temp_id,
                });
                Err(e)
            }
        }
    }

    /// Retry a failed optimistic send, reusing its body.
    pub async fn retry_send(
        &self,
        conversation_id: &str,
        temp_id: &str,
    ) -> Result<Message, ApiError> {
        let body = {
            let mut store = self.shared.store.lock().unwrap();
            let body = store
                .messages(conversation_id)
                .iter()
                .find(|m| m.message.id == temp_id && m.send_state == SendState::Failed)
                .map(|m| m.message.body.clone())
                .ok_or_else(|| ApiError::Validation("no failed send to retry".to_string()))?;
            store.apply(StoreUpdate::SendRetried {
                conversation_id: conversation_id.to_string(),
                temp_id: temp_id.to_string(),
            });
            body
        };

        match self.api.send_message(conversation_id, &body).await {
            Ok(confirmed) => {
                self.shared.store.lock().unwrap().apply(StoreUpdate::SendSucceeded {
                    temp_id: temp_id.to_string(),
                    message: confirmed.clone(),
                });
                Ok(confirmed)
            }
            Err(e) => {
                self.shared.store.lock().unwrap().apply(StoreUpdate::SendFailed {
                    conversation_id: conversation_id.to_string(),
                    temp_id: temp_id.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Drop a failed optimistic send from the cache.
    pub fn discard_failed_send(&self, conversation_id: &str, temp_id: &str) {
        self.shared.store.lock().unwrap().apply(StoreUpdate::FailedSendDiscarded {
            conversation_id: conversation_id.to_string(),
            temp_id: temp_id.to_string(),
        });
    }

    /// Zero the unread counter for a conversation, locally and remotely.
    pub async fn mark_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.shared.store.lock().unwrap().apply(StoreUpdate::MarkedRead {
            conversation_id: conversation_id.to_string(),
        });
        self.handle.mark_as_read(conversation_id);
        self.api.mark_conversation_read(conversation_id).await
    }

    // --- Presence & typing ---

    /// Record a local keystroke; emits typing start/stop with the 3-second
    /// sender-side debounce.
    pub fn notify_typing(&self, conversation_id: &str) {
        self.typing_emitter.keystroke(conversation_id);
    }

    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        self.shared.typing.lock().unwrap().typing_users(conversation_id)
    }

    pub fn presence(&self, user_id: &str) -> Option<Presence> {
        self.shared.presence.lock().unwrap().get(user_id).cloned()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.shared.presence.lock().unwrap().is_online(user_id)
    }

    /// Touch the current user's "last seen" timestamp.
    pub async fn touch_last_seen(&self) -> Result<(), ApiError> {
        self.api.heartbeat().await
    }

    /// Periodically touch "last seen" in the background.
    pub fn spawn_heartbeat(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let api = self.api.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = api.heartbeat().await {
                    debug!("heartbeat failed: {e}");
                }
            }
        })
    }

    // --- Connectivity ---

    pub fn connection_state(&self) -> ConnectionState {
        self.socket.state()
    }

    /// Watch receiver for a passive "disconnected" indicator.
    pub fn connection_state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.socket.state_receiver()
    }

    /// Relay an external "back online" signal.
    pub fn network_online(&self) {
        self.handle.network_online();
    }

    /// Relay an external "offline" signal.
    pub fn network_offline(&self) {
        self.handle.network_offline();
    }

    /// Request a fresh socket connection, e.g. after exhausted retries.
    pub fn reconnect(&self) {
        self.handle.connect();
    }

    // --- State access ---

    /// Lock the conversation store for reading. Keep the guard short-lived.
    pub fn store(&self) -> MutexGuard<'_, ConversationStore> {
        self.shared.store.lock().unwrap()
    }
}

/// Route one push event into the stores and run any follow-up effects.
fn dispatch(shared: &Arc<Shared>, api: &ApiClient, refresh: &RefreshConfig, event: ServerEvent) {
    let effects = match event {
        ServerEvent::NewMessage { message, .. } => shared
            .store
            .lock()
            .unwrap()
            .apply(StoreUpdate::IncomingMessage { message }),
        ServerEvent::ConversationUpdate { conversation } => shared
            .store
            .lock()
            .unwrap()
            .apply(StoreUpdate::ConversationUpserted(conversation)),
        ServerEvent::MessageDelivered {
            conversation_id,
            message_id,
            delivered_at,
        } => shared.store.lock().unwrap().apply(StoreUpdate::DeliveryReceipt {
            conversation_id,
            message_id,
            delivered_at,
        }),
        ServerEvent::MessageRead {
            conversation_id,
            message_id,
            read_at,
        } => shared.store.lock().unwrap().apply(StoreUpdate::ReadReceipt {
            conversation_id,
            message_id,
            read_at,
        }),
        ServerEvent::UserOnlineStatus {
            user_id,
            is_online,
            last_seen_at,
        } => {
            shared.presence.lock().unwrap().update(
                &user_id,
                Presence {
                    is_online,
                    last_seen_at,
                },
            );
            Vec::new()
        }
        ServerEvent::Typing {
            conversation_id,
            user_id,
            is_typing,
        } => {
            shared
                .typing
                .lock()
                .unwrap()
                .set_typing(&conversation_id, &user_id, is_typing);
            Vec::new()
        }
    };

    for effect in effects {
        match effect {
            StoreEffect::RefreshConversations => {
                let shared = shared.clone();
                let api = api.clone();
                let refresh = refresh.clone();
                tokio::spawn(async move {
                    if let Err(e) = refresh_conversations(&shared, &api, &refresh, false).await {
                        warn!("conversation refresh failed: {e}");
                    }
                });
            }
        }
    }
}

async fn refresh_conversations(
    shared: &Arc<Shared>,
    api: &ApiClient,
    config: &RefreshConfig,
    forced: bool,
) -> Result<(), ApiError> {
    if forced {
        let mut last = shared.last_forced.lock().unwrap();
        if last.is_some_and(|t| t.elapsed() < config.min_forced_interval) {
            debug!("forced refresh throttled");
            return Ok(());
        }
        *last = Some(tokio::time::Instant::now());
    } else {
        if shared.debounce_pending.swap(true, Ordering::SeqCst) {
            // A refresh is already queued; this trigger coalesces into it.
            return Ok(());
        }
        tokio::time::sleep(config.debounce).await;
        shared.debounce_pending.store(false, Ordering::SeqCst);
    }
    fetch_conversations_now(shared, api).await
}

async fn fetch_conversations_now(shared: &Arc<Shared>, api: &ApiClient) -> Result<(), ApiError> {
    let seq = begin_list_fetch(shared);
    let list = api.list_conversations().await?;
    if !apply_list_fetch(shared, seq, list) {
        debug!("dropping superseded conversation list response");
    }
    Ok(())
}

/// Take a sequence number for a conversation-list fetch that is about to
/// start.
fn begin_list_fetch(shared: &Shared) -> u64 {
    shared.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1
}

/// Apply a fetched conversation list, unless a newer fetch started while
/// this one was in flight. Returns false when the response was dropped as
/// stale.
fn apply_list_fetch(shared: &Shared, seq: u64, list: Vec<Conversation>) -> bool {
    if shared.fetch_seq.load(Ordering::SeqCst) != seq {
        return false;
    }
    shared
        .store
        .lock()
        .unwrap()
        .apply(StoreUpdate::ConversationsLoaded(list));
    true
}
