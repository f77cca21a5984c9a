// Persistent hub connection for real-time chat events.
//
// One WebSocket per authenticated session, authenticated at connection
// build time via an `access_token` query parameter. Frames are JSON
// invocations: outbound `{"type":"invocation","invocationId":..,"target":..,
// "arguments":[..]}`, inbound the same shape without an id. A single reader
// task dispatches inbound frames to the registered handlers in arrival
// order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use url::Url;

pub const EVENT_RECEIVE_MESSAGE: &str = "ReceiveMessage";
pub const EVENT_MESSAGE_EDITED: &str = "MessageEdited";
pub const EVENT_MESSAGE_DELETED: &str = "MessageDeleted";
pub const EVENT_USER_TYPING: &str = "UserTyping";
pub const EVENT_USER_JOINED: &str = "UserJoined";
pub const EVENT_USER_LEFT: &str = "UserLeft";

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_CAP_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

pub type EventHandler = Box<dyn Fn(&[Value]) + Send + Sync>;

/// Reconnect delay schedule: doubling from 1s, capped at 60s. Attempts
/// beyond `MAX_RECONNECT_ATTEMPTS` are not scheduled at all.
fn reconnect_delay(prev_attempts: u32) -> Duration {
    let ms = 1000u64
        .checked_shl(prev_attempts)
        .unwrap_or(RECONNECT_CAP_MS)
        .min(RECONNECT_CAP_MS);
    Duration::from_millis(ms)
}

pub struct PushChannelClient {
    hub_url: String,
    state: Mutex<ChannelState>,
    handlers: Mutex<HashMap<String, EventHandler>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    token: Mutex<Option<String>>,
}

impl PushChannelClient {
    pub fn new(hub_url: &str) -> Arc<Self> {
        Arc::new(Self {
            hub_url: hub_url.to_string(),
            state: Mutex::new(ChannelState::Disconnected),
            handlers: Mutex::new(HashMap::new()),
            outgoing: Mutex::new(None),
            token: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Connect and authenticate. No-op when already connected. The initial
    /// connect is attempted exactly once; a failure surfaces to the caller.
    /// Reconnection only kicks in on unexpected loss of an established
    /// connection.
    pub async fn start(self: &Arc<Self>, token: &str) -> anyhow::Result<()> {
        if self.is_connected() {
            log::debug!("[PUSH] already connected");
            return Ok(());
        }
        *self.state.lock().unwrap() = ChannelState::Connecting;
        *self.token.lock().unwrap() = Some(token.to_string());
        match self.connect_once(token).await {
            Ok(()) => {
                log::info!("[PUSH] connected to {}", self.hub_url);
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap() = ChannelState::Disconnected;
                Err(e)
            }
        }
    }

    /// Tear down unconditionally. Dropping the outgoing sender ends the
    /// writer task, which closes the socket; the reader task sees the
    /// `Disconnected` state and does not reconnect.
    pub fn stop(&self) {
        *self.state.lock().unwrap() = ChannelState::Disconnected;
        self.outgoing.lock().unwrap().take();
        log::info!("[PUSH] stopped");
    }

    /// Register a handler for a named server event. Registration replaces
    /// any prior handler for that name: at most one handler per event is
    /// active per client lifetime, so re-subscribing never causes duplicate
    /// delivery.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(event.to_string(), Box::new(handler));
    }

    pub fn on_receive_message<F: Fn(&[Value]) + Send + Sync + 'static>(&self, f: F) {
        self.on(EVENT_RECEIVE_MESSAGE, f);
    }

    pub fn on_message_edited<F: Fn(&[Value]) + Send + Sync + 'static>(&self, f: F) {
        self.on(EVENT_MESSAGE_EDITED, f);
    }

    pub fn on_message_deleted<F: Fn(&[Value]) + Send + Sync + 'static>(&self, f: F) {
        self.on(EVENT_MESSAGE_DELETED, f);
    }

    pub fn on_user_typing<F: Fn(&[Value]) + Send + Sync + 'static>(&self, f: F) {
        self.on(EVENT_USER_TYPING, f);
    }

    pub fn on_user_joined<F: Fn(&[Value]) + Send + Sync + 'static>(&self, f: F) {
        self.on(EVENT_USER_JOINED, f);
    }

    pub fn on_user_left<F: Fn(&[Value]) + Send + Sync + 'static>(&self, f: F) {
        self.on(EVENT_USER_LEFT, f);
    }

    /// Best-effort presence signals. Failures are logged, never returned.
    pub fn join_room(&self, conversation_id: i64) {
        self.invoke("JoinConversation", json!([conversation_id]));
    }

    pub fn leave_room(&self, conversation_id: i64) {
        self.invoke("LeaveConversation", json!([conversation_id]));
    }

    pub fn send_typing(&self, conversation_id: i64) {
        self.invoke("SendTypingIndicator", json!([conversation_id]));
    }

    fn invoke(&self, target: &str, arguments: Value) {
        let frame = json!({
            "type": "invocation",
            "invocationId": uuid::Uuid::new_v4().to_string(),
            "target": target,
            "arguments": arguments,
        })
        .to_string();
        let guard = self.outgoing.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    log::warn!("[PUSH] {} dropped, connection closed", target);
                }
            }
            None => log::warn!("[PUSH] {} skipped, not connected", target),
        }
    }

    async fn connect_once(self: &Arc<Self>, token: &str) -> anyhow::Result<()> {
        let mut url = Url::parse(&self.hub_url)?;
        url.query_pairs_mut().append_pair("access_token", token);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        self.install_connection(ws_stream);
        Ok(())
    }

    fn install_connection(self: &Arc<Self>, ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outgoing.lock().unwrap() = Some(tx);
        *self.state.lock().unwrap() = ChannelState::Connected;

        // writer task: drains queued invocations into the socket
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = ws_sender.send(WsMessage::Text(text)).await {
                    log::warn!("[PUSH] send failed: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // reader task: single consumer, dispatches in arrival order
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => this.dispatch_frame(&text),
                    Ok(WsMessage::Close(_)) => {
                        log::info!("[PUSH] connection closed by server");
                        break;
                    }
                    Ok(_) => {} // binary, ping, pong
                    Err(e) => {
                        log::warn!("[PUSH] transport error: {}", e);
                        break;
                    }
                }
            }
            this.handle_connection_loss().await;
        });
    }

    fn dispatch_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[PUSH] invalid frame: {} - raw: {}", e, text);
                return;
            }
        };
        let Some(target) = value.get("target").and_then(Value::as_str) else {
            log::debug!("[PUSH] frame without target, ignoring");
            return;
        };
        let empty = Vec::new();
        let arguments = value
            .get("arguments")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        let handlers = self.handlers.lock().unwrap();
        match handlers.get(target) {
            Some(handler) => handler(arguments),
            None => log::debug!("[PUSH] no handler for event {}", target),
        }
    }

    async fn handle_connection_loss(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ChannelState::Disconnected {
                // deliberate stop()
                return;
            }
            *state = ChannelState::Reconnecting;
        }
        self.outgoing.lock().unwrap().take();
        let token = self.token.lock().unwrap().clone();
        let Some(token) = token else {
            *self.state.lock().unwrap() = ChannelState::Disconnected;
            return;
        };
        for attempt in 0..MAX_RECONNECT_ATTEMPTS {
            let delay = reconnect_delay(attempt);
            log::info!("[PUSH] reconnect attempt {} in {:?}", attempt + 1, delay);
            tokio::time::sleep(delay).await;
            // a concurrent stop() or start() took over while the backoff
            // slept; a second connect here would stack reader tasks
            if self.state() != ChannelState::Reconnecting {
                return;
            }
            match self.connect_once(&token).await {
                Ok(()) => {
                    log::info!("[PUSH] reconnected");
                    return;
                }
                Err(e) => log::warn!("[PUSH] reconnect failed: {}", e),
            }
        }
        log::error!(
            "[PUSH] giving up after {} reconnect attempts",
            MAX_RECONNECT_ATTEMPTS
        );
        *self.state.lock().unwrap() = ChannelState::Disconnected;
    }
}
