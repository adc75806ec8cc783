//! In-memory fakes shared by the crate's tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    murmur_agents::AgentBackend,
    murmur_channels::{ChannelOutbound, OutboundDocument, Presence},
    murmur_sessions::HistoryEntry,
    murmur_voice::{VOICE_NOTE_MIME, VoiceNote, VoiceNoteSynth},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { to: String, text: String },
    Voice { to: String, bytes: usize },
    Document { to: String, file_name: String, mime_type: String },
    Presence { to: String, presence: Presence },
}

/// Records everything sent. Sends of text containing `fail_on` error out.
#[derive(Default)]
pub struct RecordingOutbound {
    pub sent: Mutex<Vec<Sent>>,
    pub fail_on: Option<String>,
    pub fail_voice: bool,
}

impl RecordingOutbound {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent items without presence updates.
    pub fn messages(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| !matches!(s, Sent::Presence { .. }))
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChannelOutbound for RecordingOutbound {
    async fn send_text(&self, to: &str, text: &str) -> murmur_channels::Result<()> {
        if self.fail_on.as_deref().is_some_and(|f| text.contains(f)) {
            return Err(murmur_channels::Error::rejected("send refused"));
        }
        self.sent.lock().unwrap().push(Sent::Text {
            to: to.into(),
            text: text.into(),
        });
        Ok(())
    }

    async fn send_voice_note(
        &self,
        to: &str,
        audio: &[u8],
        _mime_type: &str,
    ) -> murmur_channels::Result<()> {
        if self.fail_voice {
            return Err(murmur_channels::Error::unavailable("voice refused"));
        }
        self.sent.lock().unwrap().push(Sent::Voice {
            to: to.into(),
            bytes: audio.len(),
        });
        Ok(())
    }

    async fn send_document(
        &self,
        to: &str,
        document: &OutboundDocument,
    ) -> murmur_channels::Result<()> {
        self.sent.lock().unwrap().push(Sent::Document {
            to: to.into(),
            file_name: document.file_name.clone(),
            mime_type: document.mime_type.clone(),
        });
        Ok(())
    }

    async fn send_presence(&self, to: &str, presence: Presence) -> murmur_channels::Result<()> {
        self.sent.lock().unwrap().push(Sent::Presence {
            to: to.into(),
            presence,
        });
        Ok(())
    }
}

/// Replies `reply:<message>` unless a scripted result is queued. Tracks how
/// many calls are in flight at once.
#[derive(Default)]
pub struct FakeBackend {
    pub scripted: Mutex<VecDeque<murmur_agents::Result<String>>>,
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: Mutex<Vec<(String, usize)>>,
}

impl FakeBackend {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn script(&self, result: murmur_agents::Result<String>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    /// `(message, history length)` per call.
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentBackend for FakeBackend {
    async fn respond(
        &self,
        message: &str,
        history: &[HistoryEntry],
    ) -> murmur_agents::Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((message.to_string(), history.len()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.scripted.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| Ok(format!("reply:{message}")))
    }
}

pub struct FakeSynth {
    pub available: bool,
    pub fail: bool,
}

#[async_trait]
impl VoiceNoteSynth for FakeSynth {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<VoiceNote> {
        if self.fail {
            anyhow::bail!("ElevenLabs API 500: boom");
        }
        Ok(VoiceNote {
            data: text.as_bytes().to_vec(),
            mime_type: VOICE_NOTE_MIME.into(),
        })
    }
}

pub fn outbound() -> Arc<RecordingOutbound> {
    Arc::new(RecordingOutbound::default())
}
