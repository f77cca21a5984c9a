// Wire types shared by the REST gateway and the push channel.
//
// The backend serializes with camelCase by default but some endpoints still
// emit PascalCase envelopes, so every field that crosses the wire carries an
// alias for the PascalCase spelling.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Text,
    Image,
    Video,
    File,
    Link,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationType {
    DirectMessage,
    GroupChat,
}

impl Default for ConversationType {
    fn default() -> Self {
        ConversationType::GroupChat
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "MessageId")]
    pub message_id: i64,
    #[serde(alias = "ConversationId")]
    pub conversation_id: i64,
    #[serde(alias = "SenderId")]
    pub sender_id: i64,
    #[serde(alias = "SenderName", default)]
    pub sender_name: String,
    #[serde(alias = "SenderEmail", default)]
    pub sender_email: String,
    #[serde(alias = "MessageType", default)]
    pub message_type: MessageType,
    #[serde(alias = "Content", default)]
    pub content: Option<String>,
    #[serde(alias = "MediaUrl", default)]
    pub media_url: Option<String>,
    #[serde(alias = "MediaFileName", default)]
    pub media_file_name: Option<String>,
    #[serde(alias = "MediaFileSize", default)]
    pub media_file_size: Option<i64>,
    /// Raw server timestamp. The server omits the timezone designator, so
    /// interpretation goes through `utils::time::parse_server_timestamp`.
    #[serde(alias = "SentAt", default)]
    pub sent_at: String,
    #[serde(alias = "EditedAt", default)]
    pub edited_at: Option<String>,
    #[serde(alias = "IsDeleted", default)]
    pub is_deleted: bool,
    #[serde(alias = "ReplyToMessageId", default)]
    pub reply_to_message_id: Option<i64>,
}

impl Message {
    /// Sent timestamp interpreted under the UTC policy.
    pub fn sent_at_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        crate::client::utils::time::parse_server_timestamp(&self.sent_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationParticipant {
    #[serde(alias = "ParticipantId")]
    pub participant_id: i64,
    #[serde(alias = "ConversationId")]
    pub conversation_id: i64,
    #[serde(alias = "UserId")]
    pub user_id: i64,
    #[serde(alias = "UserName", default)]
    pub user_name: String,
    #[serde(alias = "Email", default)]
    pub email: String,
    #[serde(alias = "JoinedAt", default)]
    pub joined_at: String,
    #[serde(alias = "LastReadAt", default)]
    pub last_read_at: Option<String>,
    #[serde(alias = "IsActive", default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "ConversationId")]
    pub conversation_id: i64,
    #[serde(alias = "ConversationType", default)]
    pub conversation_type: ConversationType,
    #[serde(alias = "StudyGroupId", default)]
    pub study_group_id: Option<i64>,
    #[serde(alias = "StudyGroupName", default)]
    pub study_group_name: Option<String>,
    #[serde(alias = "CreatedAt", default)]
    pub created_at: String,
    #[serde(alias = "LastMessageAt", default)]
    pub last_message_at: Option<String>,
    #[serde(alias = "IsActive", default)]
    pub is_active: bool,
    #[serde(alias = "Participants", default)]
    pub participants: Vec<ConversationParticipant>,
    #[serde(alias = "UnreadCount", default)]
    pub unread_count: i64,
}

/// Outgoing body for `POST /messages`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessage {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
}

impl CreateMessage {
    pub fn text(conversation_id: i64, sender_id: i64, content: &str) -> Self {
        Self {
            conversation_id,
            sender_id,
            message_type: MessageType::Text,
            content: Some(content.to_string()),
            media_url: None,
            media_file_name: None,
            media_file_size: None,
            reply_to_message_id: None,
        }
    }

    /// Link messages carry the URL as media and the title (or the URL again)
    /// as content.
    pub fn link(conversation_id: i64, sender_id: i64, url: &str, title: Option<&str>) -> Self {
        Self {
            conversation_id,
            sender_id,
            message_type: MessageType::Link,
            content: Some(title.filter(|t| !t.trim().is_empty()).unwrap_or(url).to_string()),
            media_url: Some(url.to_string()),
            media_file_name: None,
            media_file_size: None,
            reply_to_message_id: None,
        }
    }

    pub fn image(
        conversation_id: i64,
        sender_id: i64,
        media_url: &str,
        file_name: &str,
        file_size: i64,
    ) -> Self {
        Self {
            conversation_id,
            sender_id,
            message_type: MessageType::Image,
            content: Some(file_name.to_string()),
            media_url: Some(media_url.to_string()),
            media_file_name: Some(file_name.to_string()),
            media_file_size: Some(file_size),
            reply_to_message_id: None,
        }
    }
}
