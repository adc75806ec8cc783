use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::Result;

/// Payload kind of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Audio,
    Image,
    Video,
}

impl MessageKind {
    /// Map a transport kind tag to a supported kind.
    ///
    /// Documents are only meaningful through their caption, so they are
    /// treated as text. Stickers, reactions and the like are unsupported.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "text" | "document" => Some(Self::Text),
            "audio" => Some(Self::Audio),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// One message delivered by the transport.
///
/// `message_id` doubles as the opaque payload reference for media downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub message_id: String,
    /// Conversation identifier; replies go here.
    pub chat_id: String,
    pub sender_id: String,
    /// Sent by the account owner (from another device).
    pub from_self: bool,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub caption: Option<String>,
}

impl InboundEvent {
    /// Text body, falling back to the media caption. Empty strings count as absent.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.caption())
    }

    #[must_use]
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref().filter(|c| !c.is_empty())
    }
}

/// Typing indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Composing,
    Paused,
}

/// A file sent back to the chat as a document attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDocument {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

/// Send messages to a chat.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;

    /// Send audio as a push-to-talk voice note.
    async fn send_voice_note(&self, to: &str, audio: &[u8], mime_type: &str) -> Result<()>;

    async fn send_document(&self, to: &str, document: &OutboundDocument) -> Result<()>;

    /// Update the typing indicator. No-op by default.
    async fn send_presence(&self, _to: &str, _presence: Presence) -> Result<()> {
        Ok(())
    }
}

/// Fetch the binary payload of a media message.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn download(&self, event: &InboundEvent) -> Result<Vec<u8>>;
}
