// Normalized client-side chat state: group id -> conversation metadata,
// conversation id -> ordered message list. Mutated only by the chat session
// controller; consumers hold a shared handle and read snapshots.

use std::collections::HashMap;

use crate::client::models::message::{Conversation, Message};

/// Content a soft-deleted message is rewritten to.
pub const DELETED_PLACEHOLDER: &str = "Message deleted";

#[derive(Debug, Default)]
pub struct ConversationStore {
    /// Keyed by study group id.
    conversations: HashMap<i64, Conversation>,
    /// Keyed by conversation id. Order is insertion order as delivered;
    /// never re-sorted.
    messages: HashMap<i64, Vec<Message>>,
    /// True while an activation sequence is in flight.
    pub loading: bool,
    /// Last activation failure, cleared on the next successful one.
    pub last_error: Option<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_conversation(&mut self, group_id: i64, conversation: Conversation) {
        self.conversations.insert(group_id, conversation);
    }

    pub fn conversation_for_group(&self, group_id: i64) -> Option<&Conversation> {
        self.conversations.get(&group_id)
    }

    /// Replace the full message list for a conversation (history load).
    pub fn set_messages(&mut self, conversation_id: i64, messages: Vec<Message>) {
        self.messages.insert(conversation_id, messages);
    }

    pub fn messages(&self, conversation_id: i64) -> &[Message] {
        self.messages
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append a message to its conversation. Idempotent: a message whose id
    /// already exists in the list is dropped, so the optimistic append and
    /// the push-event append of the same message reconcile to one copy.
    pub fn append_message(&mut self, message: Message) -> bool {
        let list = self.messages.entry(message.conversation_id).or_default();
        if list.iter().any(|m| m.message_id == message.message_id) {
            return false;
        }
        list.push(message);
        true
    }

    /// Replace a message matched by id. No-op when the id is absent.
    pub fn replace_message(&mut self, conversation_id: i64, message: Message) -> bool {
        if let Some(list) = self.messages.get_mut(&conversation_id) {
            if let Some(slot) = list.iter_mut().find(|m| m.message_id == message.message_id) {
                *slot = message;
                return true;
            }
        }
        false
    }

    /// Soft delete: the entry keeps its position, the deletion flag is set
    /// and the content is rewritten to the placeholder.
    pub fn mark_deleted(&mut self, conversation_id: i64, message_id: i64) -> bool {
        if let Some(list) = self.messages.get_mut(&conversation_id) {
            if let Some(msg) = list.iter_mut().find(|m| m.message_id == message_id) {
                msg.is_deleted = true;
                msg.content = Some(DELETED_PLACEHOLDER.to_string());
                return true;
            }
        }
        false
    }

    pub fn clear(&mut self, conversation_id: i64) {
        if let Some(list) = self.messages.get_mut(&conversation_id) {
            list.clear();
        }
    }
}
