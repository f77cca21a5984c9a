// Chat session controller: the single place that binds a study group to a
// conversation and drives the realtime session for one active group at a
// time. Inbound hub events are bound once for the controller's lifetime and
// consult the live active-conversation slot, so handlers stay correct across
// group switches.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde_json::Value;

use crate::client::config::ClientConfig;
use crate::client::models::conversation_store::ConversationStore;
use crate::client::models::message::{Conversation, CreateMessage, Message};
use crate::client::services::push_channel::PushChannelClient;
use crate::client::services::rest_gateway::RestGateway;
use crate::client::utils::session_store::SessionStore;

/// How long a typing-indicator entry lives after its last signal.
const TYPING_WINDOW: Duration = Duration::from_secs(3);

/// Client-side ceiling for image attachments.
const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

struct SessionShared {
    /// The currently active conversation. Handlers read this through the
    /// shared slot, never a snapshot taken at bind time.
    active: Mutex<Option<Conversation>>,
    /// Display names currently typing, each tagged with the generation of
    /// its latest signal so a stale expiry timer cannot remove a refreshed
    /// entry.
    typing: Mutex<std::collections::HashMap<String, u64>>,
    typing_seq: AtomicU64,
    /// Single-flight guard: at most one activation sequence at a time.
    activating: AtomicBool,
    /// Compose buffer; cleared only on successful send so a failed send
    /// leaves the user's input intact for retry.
    compose: Mutex<String>,
}

#[derive(Clone)]
pub struct ChatSessionController {
    gateway: Arc<RestGateway>,
    channel: Arc<PushChannelClient>,
    session: Arc<SessionStore>,
    store: Arc<Mutex<ConversationStore>>,
    shared: Arc<SessionShared>,
    current_user_id: i64,
    settle_delay: Duration,
    history_page_size: i64,
}

impl ChatSessionController {
    /// Requires a live session: the current user id comes from the stored
    /// token. Binds the hub event handlers exactly once.
    pub fn new(
        gateway: Arc<RestGateway>,
        channel: Arc<PushChannelClient>,
        session: Arc<SessionStore>,
        store: Arc<Mutex<ConversationStore>>,
        config: &ClientConfig,
    ) -> anyhow::Result<Self> {
        let identity = session
            .identity()
            .ok_or_else(|| anyhow!("no valid session, log in first"))?;
        let current_user_id = identity
            .numeric_user_id()
            .context("token user id is not numeric")?;
        let controller = Self {
            gateway,
            channel,
            session,
            store,
            shared: Arc::new(SessionShared {
                active: Mutex::new(None),
                typing: Mutex::new(std::collections::HashMap::new()),
                typing_seq: AtomicU64::new(0),
                activating: AtomicBool::new(false),
                compose: Mutex::new(String::new()),
            }),
            current_user_id,
            settle_delay: config.settle_delay(),
            history_page_size: config.history_page_size,
        };
        controller.bind_events();
        Ok(controller)
    }

    // The handler closures hold controller clones and the controller holds
    // the channel, so the two keep each other alive until process exit.
    // Controllers are app-lifetime objects; nothing ever needs this cycle
    // to collapse.
    fn bind_events(&self) {
        let this = self.clone();
        self.channel
            .on_receive_message(move |args| this.on_receive_message(args));
        let this = self.clone();
        self.channel
            .on_message_edited(move |args| this.on_message_edited(args));
        let this = self.clone();
        self.channel
            .on_message_deleted(move |args| this.on_message_deleted(args));
        let this = self.clone();
        self.channel
            .on_user_typing(move |args| this.on_user_typing(args));
        let this = self.clone();
        self.channel.on_user_joined(move |args| this.on_presence(args, true));
        let this = self.clone();
        self.channel.on_user_left(move |args| this.on_presence(args, false));
    }

    // ---- activation -----------------------------------------------------

    /// Activate a study group's chat: resolve-or-create the conversation,
    /// load history, mark read (best-effort), ensure the push channel is up
    /// and join its room. A second activation while one is in flight is
    /// dropped, not queued, to avoid racing conversation resolution.
    pub async fn activate_group(&self, group_id: i64) -> anyhow::Result<()> {
        if self
            .shared
            .activating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("[SESSION] activation already in flight, dropping group {}", group_id);
            return Ok(());
        }
        self.store.lock().unwrap().loading = true;
        let result = self.activate_inner(group_id).await;
        {
            let mut store = self.store.lock().unwrap();
            store.loading = false;
            store.last_error = result.as_ref().err().map(|e| e.to_string());
        }
        self.shared.activating.store(false, Ordering::SeqCst);
        result
    }

    async fn activate_inner(&self, group_id: i64) -> anyhow::Result<()> {
        let previous = self
            .shared
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.conversation_id);

        let conversation = self
            .gateway
            .get_or_create_group_conversation(group_id)
            .await?;
        let conversation_id = conversation.conversation_id;

        if let Some(prev) = previous {
            if prev != conversation_id {
                self.channel.leave_room(prev);
            }
        }

        let history = self
            .gateway
            .get_conversation_messages(conversation_id, 0, self.history_page_size)
            .await?;
        {
            let mut store = self.store.lock().unwrap();
            store.upsert_conversation(group_id, conversation.clone());
            store.set_messages(conversation_id, history);
        }
        *self.shared.active.lock().unwrap() = Some(conversation);

        if let Err(e) = self.gateway.mark_read(conversation_id).await {
            log::warn!("[SESSION] mark-read failed for {}: {}", conversation_id, e);
        }

        if !self.channel.is_connected() {
            match self.session.token() {
                Some(token) => match self.channel.start(&token).await {
                    // the transport needs a short settle window after a
                    // fresh connect before room operations are reliable
                    Ok(()) => tokio::time::sleep(self.settle_delay).await,
                    Err(e) => log::warn!("[SESSION] push channel unavailable: {}", e),
                },
                None => log::warn!("[SESSION] no token for push channel"),
            }
        }
        if self.channel.is_connected() {
            self.channel.join_room(conversation_id);
        } else {
            log::warn!(
                "[SESSION] conversation {} running degraded, live updates disabled",
                conversation_id
            );
        }
        Ok(())
    }

    /// Leave the previously joined room, if any, unconditionally.
    pub fn deactivate(&self) {
        if let Some(conversation) = self.shared.active.lock().unwrap().take() {
            self.channel.leave_room(conversation.conversation_id);
        }
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.shared.active.lock().unwrap().clone()
    }

    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        Arc::clone(&self.store)
    }

    // ---- inbound events -------------------------------------------------

    fn on_receive_message(&self, args: &[Value]) {
        let Some(message) = args.first().and_then(decode_receive_payload) else {
            log::warn!("[SESSION] unreadable ReceiveMessage payload");
            return;
        };
        let Some(active_id) = self.active_conversation_id() else {
            return;
        };
        if message.conversation_id != active_id {
            return;
        }
        let from_self = message.sender_id == self.current_user_id;
        self.store.lock().unwrap().append_message(message);
        if !from_self {
            let gateway = Arc::clone(&self.gateway);
            tokio::spawn(async move {
                if let Err(e) = gateway.mark_read(active_id).await {
                    log::debug!("[SESSION] mark-read after receive failed: {}", e);
                }
            });
        }
    }

    fn on_message_edited(&self, args: &[Value]) {
        let Some(message) = args.first().and_then(|v| decode_message(v)) else {
            log::warn!("[SESSION] unreadable MessageEdited payload");
            return;
        };
        if let Some(active_id) = self.active_conversation_id() {
            self.store.lock().unwrap().replace_message(active_id, message);
        }
    }

    fn on_message_deleted(&self, args: &[Value]) {
        let Some(message_id) = args.first().and_then(Value::as_i64) else {
            log::warn!("[SESSION] unreadable MessageDeleted payload");
            return;
        };
        if let Some(active_id) = self.active_conversation_id() {
            self.store.lock().unwrap().mark_deleted(active_id, message_id);
        }
    }

    fn on_user_typing(&self, args: &[Value]) {
        let (Some(conversation_id), Some(user_id), Some(user_name)) = (
            args.first().and_then(Value::as_i64),
            args.get(1).and_then(Value::as_i64),
            args.get(2).and_then(Value::as_str),
        ) else {
            return;
        };
        if user_id == self.current_user_id {
            return;
        }
        if self.active_conversation_id() != Some(conversation_id) {
            return;
        }
        self.note_typing(user_name.to_string());
    }

    fn on_presence(&self, args: &[Value], joined: bool) {
        let (Some(conversation_id), Some(user_name)) = (
            args.first().and_then(Value::as_i64),
            args.get(2)
                .and_then(Value::as_str)
                .or_else(|| args.get(1).and_then(Value::as_str)),
        ) else {
            return;
        };
        if self.active_conversation_id() != Some(conversation_id) {
            return;
        }
        if joined {
            log::info!("[SESSION] {} joined conversation {}", user_name, conversation_id);
        } else {
            log::info!("[SESSION] {} left conversation {}", user_name, conversation_id);
            // whoever left is no longer typing
            self.shared.typing.lock().unwrap().remove(user_name);
        }
    }

    fn active_conversation_id(&self) -> Option<i64> {
        self.shared
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.conversation_id)
    }

    fn note_typing(&self, name: String) {
        let generation = self.shared.typing_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared
            .typing
            .lock()
            .unwrap()
            .insert(name.clone(), generation);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_WINDOW).await;
            let mut typing = shared.typing.lock().unwrap();
            // a fresher signal re-armed this entry; leave it alone
            if typing.get(&name) == Some(&generation) {
                typing.remove(&name);
            }
        });
    }

    /// Display names currently typing in the active conversation, sorted
    /// for stable rendering.
    pub fn typing_users(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.typing.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Forward the local user's typing signal to the room. Best-effort.
    pub fn notify_typing(&self) {
        if let Some(active_id) = self.active_conversation_id() {
            self.channel.send_typing(active_id);
        }
    }

    // ---- outbound sends -------------------------------------------------

    pub fn set_compose(&self, text: &str) {
        *self.shared.compose.lock().unwrap() = text.to_string();
    }

    pub fn compose(&self) -> String {
        self.shared.compose.lock().unwrap().clone()
    }

    /// Send the compose buffer as a text message. The buffer is cleared
    /// only after the server confirms; on failure it is left untouched so
    /// the user can retry.
    pub async fn send_compose(&self) -> anyhow::Result<Message> {
        let content = self.compose();
        let content = content.trim();
        if content.is_empty() {
            bail!("nothing to send");
        }
        let message = self.send_text(content).await?;
        self.shared.compose.lock().unwrap().clear();
        Ok(message)
    }

    /// Optimistic reconciliation: the server-confirmed message carries the
    /// authoritative id, and the store's idempotent append absorbs the case
    /// where the push event for the same message arrived first.
    pub async fn send_text(&self, content: &str) -> anyhow::Result<Message> {
        let conversation_id = self.require_active()?;
        let body = CreateMessage::text(conversation_id, self.current_user_id, content);
        let message = self.gateway.send_message(&body).await?;
        self.store.lock().unwrap().append_message(message.clone());
        Ok(message)
    }

    pub async fn send_link(&self, url: &str, title: Option<&str>) -> anyhow::Result<Message> {
        let conversation_id = self.require_active()?;
        let url = url.trim();
        if url.is_empty() {
            bail!("link URL is empty");
        }
        let body = CreateMessage::link(conversation_id, self.current_user_id, url, title);
        let message = self.gateway.send_message(&body).await?;
        self.store.lock().unwrap().append_message(message.clone());
        Ok(message)
    }

    /// Validate, upload, then send an image message referencing the
    /// uploaded file.
    pub async fn send_image(
        &self,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<Message> {
        let conversation_id = self.require_active()?;
        if !mime.starts_with("image/") {
            bail!("please select an image file");
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            bail!("image size must be less than 5MB");
        }
        let file_size = bytes.len() as i64;
        let file_url = self.gateway.upload_image(file_name, mime, bytes).await?;
        let body = CreateMessage::image(
            conversation_id,
            self.current_user_id,
            &file_url,
            file_name,
            file_size,
        );
        let message = self.gateway.send_message(&body).await?;
        self.store.lock().unwrap().append_message(message.clone());
        Ok(message)
    }

    /// Edit one of the user's messages. The store is updated from the
    /// response; the push event for other participants converges the same
    /// way.
    pub async fn edit_message(&self, message_id: i64, content: &str) -> anyhow::Result<()> {
        let updated = self.gateway.edit_message(message_id, content).await?;
        if let Some(active_id) = self.active_conversation_id() {
            self.store.lock().unwrap().replace_message(active_id, updated);
        }
        Ok(())
    }

    /// Soft-delete a message: the entry stays in place with the deletion
    /// placeholder.
    pub async fn delete_message(&self, message_id: i64) -> anyhow::Result<()> {
        self.gateway.delete_message(message_id).await?;
        if let Some(active_id) = self.active_conversation_id() {
            self.store.lock().unwrap().mark_deleted(active_id, message_id);
        }
        Ok(())
    }

    fn require_active(&self) -> anyhow::Result<i64> {
        self.active_conversation_id()
            .ok_or_else(|| anyhow!("no active conversation"))
    }
}

fn decode_message(value: &Value) -> Option<Message> {
    serde_json::from_value(value.clone()).ok()
}

/// ReceiveMessage payloads arrive either as a `{conversationId, message,
/// type}` envelope or as the bare message object.
fn decode_receive_payload(value: &Value) -> Option<Message> {
    let inner = value
        .get("message")
        .or_else(|| value.get("Message"))
        .unwrap_or(value);
    decode_message(inner)
}
