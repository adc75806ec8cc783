//! Speech-to-text provider abstraction.

mod cli_utils;
mod whisper_cli;

pub use {
    cli_utils::{expand_tilde, find_binary},
    whisper_cli::WhisperCli,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    std::path::PathBuf,
};

/// Request to transcribe an audio file already on disk.
///
/// Callers normally pass a 16 kHz mono WAV produced by
/// [`Transcoder::to_speech_wav`](crate::Transcoder::to_speech_wav).
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio_path: PathBuf,
    /// Language hint (ISO 639-1 code, e.g., "en", "pt").
    pub language: Option<String>,
}

impl TranscribeRequest {
    #[must_use]
    pub fn new(audio_path: impl Into<PathBuf>) -> Self {
        Self {
            audio_path: audio_path.into(),
            language: None,
        }
    }
}

/// Transcription result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    /// Transcribed text, trimmed. Empty when nothing intelligible was heard.
    pub text: String,
    /// Detected language (ISO 639-1 code).
    pub language: Option<String>,
}

impl Transcript {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Speech-to-Text provider trait.
#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Provider identifier (e.g., "whisper").
    fn id(&self) -> &'static str;

    /// Check if the provider is configured and ready.
    fn is_configured(&self) -> bool;

    /// Transcribe audio to text.
    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript>;
}
