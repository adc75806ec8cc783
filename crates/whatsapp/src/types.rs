//! Wire types for the sidecar WebSocket protocol.
//!
//! Frames are JSON objects tagged by `type`.

use {
    murmur_channels::{InboundEvent, MessageKind, Presence},
    serde::{Deserialize, Serialize},
};

/// Only messages delivered with this upsert type are live; the rest are
/// history sync and must not be answered.
pub const LIVE_UPSERT_TYPE: &str = "notify";

/// Frames sent by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    /// Pairing payload to show as a QR code.
    Qr { qr: String },
    Connected {
        #[serde(default)]
        phone_number: Option<String>,
    },
    Disconnected {
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
    },
    LoggedOut,
    Message(WireMessage),
    MediaDownloaded {
        request_id: String,
        #[serde(default)]
        data_base64: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error { error: String },
}

/// An inbound chat message as reported by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WireMessage {
    pub message_id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    #[serde(default)]
    pub from_me: bool,
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    pub upsert_type: String,
}

impl WireMessage {
    /// Convert to a channel event. History-sync upserts and unsupported
    /// kinds yield `None`.
    #[must_use]
    pub fn into_event(self) -> Option<InboundEvent> {
        if self.upsert_type != LIVE_UPSERT_TYPE {
            return None;
        }
        let kind = MessageKind::from_tag(&self.kind)?;
        Some(InboundEvent {
            message_id: self.message_id,
            chat_id: self.chat_jid,
            sender_id: self.sender_jid,
            from_self: self.from_me,
            kind,
            text: self.text,
            caption: self.caption,
        })
    }
}

/// Frames sent to the sidecar. Every frame carries a `request_id`; the
/// sidecar echoes it on the matching reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Start a Baileys session backed by `auth_dir`.
    Login { request_id: String, auth_dir: String },
    Logout { request_id: String },
    SendText {
        request_id: String,
        to: String,
        text: String,
    },
    SendAudio {
        request_id: String,
        to: String,
        data_base64: String,
        mime_type: String,
        /// Push-to-talk: render as a voice note.
        ptt: bool,
    },
    SendDocument {
        request_id: String,
        to: String,
        data_base64: String,
        mime_type: String,
        file_name: String,
    },
    Presence {
        request_id: String,
        to: String,
        state: Presence,
    },
    DownloadMedia {
        request_id: String,
        message_id: String,
    },
}

impl GatewayMessage {
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Login { request_id, .. }
            | Self::Logout { request_id }
            | Self::SendText { request_id, .. }
            | Self::SendAudio { request_id, .. }
            | Self::SendDocument { request_id, .. }
            | Self::Presence { request_id, .. }
            | Self::DownloadMedia { request_id, .. } => request_id,
        }
    }
}
