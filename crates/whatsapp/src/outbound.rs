use std::time::Duration;

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    murmur_channels::{
        ChannelOutbound, Error as ChannelError, InboundEvent, MediaSource, OutboundDocument,
        Presence, Result,
    },
    tracing::debug,
};

use crate::{
    error::Error,
    sidecar::{Reply, SidecarSession},
    supervisor::SharedSlot,
    types::GatewayMessage,
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends through whichever sidecar session is currently live.
#[derive(Clone)]
pub struct WhatsAppOutbound {
    slot: SharedSlot,
    timeout: Duration,
}

impl WhatsAppOutbound {
    #[must_use]
    pub fn new(slot: SharedSlot) -> Self {
        Self {
            slot,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn session(&self) -> Result<std::sync::Arc<SidecarSession>> {
        self.slot
            .current()
            .await
            .ok_or_else(|| Error::NotConnected.into())
    }

    async fn deliver(&self, msg: GatewayMessage) -> Result<()> {
        let session = self.session().await?;
        match session.request(msg, self.timeout).await? {
            Reply::Sent { success: true, .. } => Ok(()),
            Reply::Sent { error, .. } => Err(ChannelError::rejected(
                error.unwrap_or_else(|| "send failed".into()),
            )),
            Reply::Media { .. } => Err(Error::protocol("media reply to a send request").into()),
        }
    }
}

fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl ChannelOutbound for WhatsAppOutbound {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        self.deliver(GatewayMessage::SendText {
            request_id: request_id(),
            to: to.into(),
            text: text.into(),
        })
        .await
    }

    async fn send_voice_note(&self, to: &str, audio: &[u8], mime_type: &str) -> Result<()> {
        self.deliver(GatewayMessage::SendAudio {
            request_id: request_id(),
            to: to.into(),
            data_base64: BASE64.encode(audio),
            mime_type: mime_type.into(),
            ptt: true,
        })
        .await
    }

    async fn send_document(&self, to: &str, document: &OutboundDocument) -> Result<()> {
        self.deliver(GatewayMessage::SendDocument {
            request_id: request_id(),
            to: to.into(),
            data_base64: BASE64.encode(&document.data),
            mime_type: document.mime_type.clone(),
            file_name: document.file_name.clone(),
        })
        .await
    }

    /// Fire-and-forget: typing indicators never wait for an acknowledgement.
    async fn send_presence(&self, to: &str, presence: Presence) -> Result<()> {
        let session = self.session().await?;
        session.send(&GatewayMessage::Presence {
            request_id: request_id(),
            to: to.into(),
            state: presence,
        })?;
        debug!(to, ?presence, "presence sent");
        Ok(())
    }
}

#[async_trait]
impl MediaSource for WhatsAppOutbound {
    async fn download(&self, event: &InboundEvent) -> Result<Vec<u8>> {
        let session = self.session().await?;
        let reply = session
            .request(
                GatewayMessage::DownloadMedia {
                    request_id: request_id(),
                    message_id: event.message_id.clone(),
                },
                self.timeout,
            )
            .await?;
        match reply {
            Reply::Media {
                data_base64: Some(data),
                ..
            } => BASE64
                .decode(data.as_bytes())
                .map_err(|e| ChannelError::external("decoding media payload", e)),
            Reply::Media { error, .. } => Err(ChannelError::rejected(
                error.unwrap_or_else(|| "media download returned no data".into()),
            )),
            Reply::Sent { .. } => Err(Error::protocol("send reply to a download request").into()),
        }
    }
}
