//! Turning reply text into a sendable voice note.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    tracing::debug,
};

use crate::{
    transcode::Transcoder,
    tts::{AudioFormat, SynthesizeRequest, TtsProvider},
};

/// MIME type chat clients need to render audio as a push-to-talk note.
pub const VOICE_NOTE_MIME: &str = "audio/ogg; codecs=opus";

/// Opus-encoded voice note ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceNote {
    pub data: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait VoiceNoteSynth: Send + Sync {
    /// Whether synthesis can be attempted at all.
    fn is_available(&self) -> bool;

    async fn synthesize(&self, text: &str) -> Result<VoiceNote>;
}

/// Synthesize with a [`TtsProvider`], then re-encode to Opus.
pub struct TtsVoiceNotes {
    tts: Arc<dyn TtsProvider>,
    transcoder: Arc<dyn Transcoder>,
    scratch_dir: PathBuf,
}

impl TtsVoiceNotes {
    pub fn new(
        tts: Arc<dyn TtsProvider>,
        transcoder: Arc<dyn Transcoder>,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            tts,
            transcoder,
            scratch_dir,
        }
    }
}

#[async_trait]
impl VoiceNoteSynth for TtsVoiceNotes {
    fn is_available(&self) -> bool {
        self.tts.is_configured()
    }

    async fn synthesize(&self, text: &str) -> Result<VoiceNote> {
        if !self.tts.is_configured() {
            bail!("{} not configured", self.tts.id());
        }

        let audio = self.tts.synthesize(SynthesizeRequest::text(text)).await?;
        if audio.format == AudioFormat::Opus {
            return Ok(VoiceNote {
                data: audio.data.to_vec(),
                mime_type: VOICE_NOTE_MIME.into(),
            });
        }

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        // Both intermediate files go away with the directory.
        let scratch = tempfile::Builder::new()
            .prefix("tts_")
            .tempdir_in(&self.scratch_dir)
            .context("failed to create tts scratch dir")?;
        let input = scratch
            .path()
            .join(format!("speech.{}", audio.format.extension()));
        let output = scratch.path().join("speech.ogg");

        tokio::fs::write(&input, &audio.data).await?;
        self.transcoder
            .to_opus(&input, &output)
            .await
            .context("voice note conversion failed")?;
        let data = tokio::fs::read(&output).await?;

        debug!(bytes = data.len(), "voice note ready");
        Ok(VoiceNote {
            data,
            mime_type: VOICE_NOTE_MIME.into(),
        })
    }
}
