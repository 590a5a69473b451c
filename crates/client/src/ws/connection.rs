//! Native WebSocket implementation using tokio-tungstenite.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fablink_shared::{ClientCommand, ServerEvent, WsEnvelope};
use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::{ConnectionState, Control, ReconnectConfig, SocketHandle};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// A managed WebSocket connection to the messaging namespace.
///
/// At most one live connection exists per instance. The `url_builder`
/// closure is called before every attempt so a refreshed credential is
/// picked up on reconnect; returning `None` (no session) leaves the
/// connection silently disconnected.
pub struct SocketConnection {
    handle: SocketHandle,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SocketConnection {
    /// Create a new connection and start its management loop.
    pub fn new(
        url_builder: impl Fn() -> Option<String> + Send + Sync + 'static,
        on_event: impl Fn(WsEnvelope<ServerEvent>) + Send + Sync + 'static,
        config: ReconnectConfig,
    ) -> Self {
        let (sender, receiver) = unbounded();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        tokio::spawn(run_connection_loop(
            receiver,
            state_tx,
            Arc::new(url_builder),
            Arc::new(on_event),
            config,
        ));

        Self {
            handle: SocketHandle::new(sender),
            state_rx,
        }
    }

    /// Get a handle for sending commands and connectivity signals.
    pub fn handle(&self) -> SocketHandle {
        self.handle.clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch receiver for observing state changes (e.g. a "disconnected"
    /// indicator in the UI).
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

fn envelope(cmd: ClientCommand) -> WsEnvelope<ClientCommand> {
    WsEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        payload: cmd,
        ts: Utc::now(),
        correlation_id: None,
    }
}

/// Keep the joined-room set in step with outgoing commands so rooms can be
/// re-joined after a reconnect.
fn track_membership(joined: &mut HashSet<String>, cmd: &ClientCommand) {
    match cmd {
        ClientCommand::JoinConversation { conversation_id } => {
            joined.insert(conversation_id.clone());
        }
        ClientCommand::LeaveConversation { conversation_id } => {
            joined.remove(conversation_id);
        }
        _ => {}
    }
}

async fn send_command(write: &mut WsSink, cmd: ClientCommand) -> bool {
    match serde_json::to_string(&envelope(cmd)) {
        Ok(json) => match write.send(Message::Text(json.into())).await {
            Ok(()) => true,
            Err(e) => {
                warn!("websocket send failed: {e}");
                false
            }
        },
        Err(e) => {
            error!("failed to serialize command: {e}");
            true
        }
    }
}

enum SleepOutcome {
    Elapsed,
    GoOnline,
    GoOffline,
    ConnectNow,
    Closed,
}

/// Sleep while staying responsive to control messages, so membership
/// changes are not lost and connectivity signals cut the wait short.
async fn responsive_sleep(
    ctrl: &mut UnboundedReceiver<Control>,
    joined: &mut HashSet<String>,
    delay_ms: u64,
) -> SleepOutcome {
    let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return SleepOutcome::Elapsed,
            control = ctrl.next() => match control {
                Some(Control::Emit(cmd)) => track_membership(joined, &cmd),
                Some(Control::NetworkOnline) => return SleepOutcome::GoOnline,
                Some(Control::NetworkOffline) => return SleepOutcome::GoOffline,
                Some(Control::Reconnect) => return SleepOutcome::ConnectNow,
                None => return SleepOutcome::Closed,
            },
        }
    }
}

async fn run_connection_loop(
    mut ctrl: UnboundedReceiver<Control>,
    state: watch::Sender<ConnectionState>,
    url_builder: Arc<dyn Fn() -> Option<String> + Send + Sync>,
    on_event: Arc<dyn Fn(WsEnvelope<ServerEvent>) + Send + Sync>,
    config: ReconnectConfig,
) {
    let mut joined: HashSet<String> = HashSet::new();
    let mut online = true;
    let mut attempt = 0u32;

    'outer: loop {
        // While offline, do nothing but wait for the online signal.
        while !online {
            match ctrl.next().await {
                Some(Control::Emit(cmd)) => track_membership(&mut joined, &cmd),
                Some(Control::NetworkOnline) => {
                    online = true;
                    attempt = 0;
                }
                Some(Control::NetworkOffline) | Some(Control::Reconnect) => {}
                None => return,
            }
        }

        // No session credential: stay disconnected, check again shortly.
        let Some(url) = url_builder() else {
            let _ = state.send(ConnectionState::Disconnected);
            match responsive_sleep(&mut ctrl, &mut joined, 1000).await {
                SleepOutcome::GoOffline => online = false,
                SleepOutcome::Closed => return,
                _ => {}
            }
            continue;
        };

        if attempt == 0 {
            let _ = state.send(ConnectionState::Connecting);
        } else {
            let _ = state.send(ConnectionState::Reconnecting { attempt });
        }

        match connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                let _ = state.send(ConnectionState::Connected);
                attempt = 0;
                info!("messaging socket connected");

                let (mut write, mut read) = ws_stream.split();

                // Room subscriptions do not survive a reconnect; re-join
                // everything we were in.
                let rooms: Vec<String> = joined.iter().cloned().collect();
                let mut dropped = false;
                for conversation_id in rooms {
                    if !send_command(&mut write, ClientCommand::JoinConversation { conversation_id })
                        .await
                    {
                        dropped = true;
                        break;
                    }
                }

                while !dropped {
                    tokio::select! {
                        incoming = read.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<WsEnvelope<ServerEvent>>(&text) {
                                    Ok(event) => on_event(event),
                                    Err(e) => warn!("failed to parse push event: {e}"),
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!("messaging socket received close frame");
                                dropped = true;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                // Pong is handled automatically by tungstenite
                                debug!("received ping: {data:?}");
                            }
                            Some(Ok(_)) => {
                                // Ignore binary, pong, etc.
                            }
                            Some(Err(e)) => {
                                warn!("websocket read error: {e}");
                                dropped = true;
                            }
                            None => dropped = true,
                        },
                        control = ctrl.next() => match control {
                            Some(Control::Emit(cmd)) => {
                                track_membership(&mut joined, &cmd);
                                if !send_command(&mut write, cmd).await {
                                    dropped = true;
                                }
                            }
                            Some(Control::NetworkOffline) => {
                                // Tear down right away rather than waiting
                                // for a read timeout.
                                online = false;
                                let _ = write.close().await;
                                dropped = true;
                            }
                            Some(Control::NetworkOnline) | Some(Control::Reconnect) => {}
                            None => {
                                let _ = write.close().await;
                                return;
                            }
                        },
                    }
                }

                let _ = state.send(ConnectionState::Disconnected);
                info!("messaging socket disconnected");
                if !online {
                    continue 'outer;
                }
                // Server-initiated drop: fall through to the backoff below.
            }
            Err(e) => {
                warn!("messaging socket connect failed: {e}");
            }
        }

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            let _ = state.send(ConnectionState::Failed {
                reason: format!("max reconnect attempts ({}) exceeded", config.max_attempts),
            });
            // Stop retrying until an external signal or explicit connect.
            loop {
                match ctrl.next().await {
                    Some(Control::Emit(cmd)) => track_membership(&mut joined, &cmd),
                    Some(Control::NetworkOnline) => {
                        online = true;
                        attempt = 0;
                        continue 'outer;
                    }
                    Some(Control::Reconnect) => {
                        attempt = 0;
                        continue 'outer;
                    }
                    Some(Control::NetworkOffline) => {
                        online = false;
                        let _ = state.send(ConnectionState::Disconnected);
                    }
                    None => return,
                }
            }
        }

        let delay = config.delay_for_attempt(attempt);
        info!("reconnecting in {delay}ms (attempt {})", attempt + 1);
        attempt += 1;
        match responsive_sleep(&mut ctrl, &mut joined, delay).await {
            SleepOutcome::Elapsed => {}
            SleepOutcome::GoOnline | SleepOutcome::ConnectNow => attempt = 0,
            SleepOutcome::GoOffline => online = false,
            SleepOutcome::Closed => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::watch;

    // Nothing listens on port 1, so every attempt is refused immediately.
    fn refused_url() -> Option<String> {
        Some("ws://127.0.0.1:1/".to_string())
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<ConnectionState>,
        pred: impl FnMut(&ConnectionState) -> bool,
    ) -> ConnectionState {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for connection state")
            .expect("connection loop dropped the state channel")
            .clone()
    }

    #[tokio::test]
    async fn exhausted_retries_end_in_the_failed_state() {
        let connection = SocketConnection::new(
            refused_url,
            |_event| {},
            ReconnectConfig {
                max_attempts: 1,
                initial_delay_ms: 10,
                max_delay_ms: 20,
            },
        );
        let mut rx = connection.state_receiver();
        let state =
            wait_for_state(&mut rx, |s| matches!(s, ConnectionState::Failed { .. })).await;
        assert!(!state.is_connecting());
    }

    #[tokio::test]
    async fn online_signal_recovers_from_the_failed_state() {
        let connection = SocketConnection::new(
            refused_url,
            |_event| {},
            ReconnectConfig {
                max_attempts: 1,
                initial_delay_ms: 10,
                max_delay_ms: 20,
            },
        );
        let mut rx = connection.state_receiver();
        wait_for_state(&mut rx, |s| matches!(s, ConnectionState::Failed { .. })).await;

        // Going offline while failed clears the indicator; the next online
        // signal must restart connecting on its own.
        let handle = connection.handle();
        handle.network_offline();
        handle.network_online();
        let state =
            wait_for_state(&mut rx, |s| !matches!(s, ConnectionState::Failed { .. })).await;
        assert!(!matches!(state, ConnectionState::Failed { .. }));
    }
}
