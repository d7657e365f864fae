use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AccountId;

pub type ChatMessageId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Admin,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Admin => "admin",
        }
    }
}

impl FromStr for SenderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(SenderType::User),
            "admin" => Ok(SenderType::Admin),
            other => Err(format!("unknown sender type: {other}")),
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "system" => Ok(MessageType::System),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// Pointer to an uploaded file. The bytes live elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub url: String,
    pub name: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: ChatMessageId,
    pub conversation_id: String,
    pub sender_id: AccountId,
    pub sender_type: SenderType,
    pub body: String,
    pub message_type: MessageType,
    pub media: Option<MediaAttachment>,
    /// Set once, when the message is first read
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        sender_id: AccountId,
        sender_type: SenderType,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            sender_id,
            sender_type,
            body: body.into().trim().to_string(),
            message_type: MessageType::Text,
            media: None,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_media(mut self, message_type: MessageType, media: MediaAttachment) -> Self {
        self.message_type = message_type;
        self.media = Some(media);
        self
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Move from unread to read. Returns false if the message was already read;
    /// the original read time is kept.
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_read() {
            return false;
        }
        self.read_at = Some(at);
        true
    }
}

/// Conversation between a user and support, keyed by the user's account.
pub fn support_conversation_id(account_id: AccountId) -> String {
    format!("support-{}", account_id.simple())
}
