//! Text-to-speech provider abstraction.

mod elevenlabs;

pub use elevenlabs::ElevenLabsTts;

use {
    anyhow::Result,
    async_trait::async_trait,
    bytes::Bytes,
    serde::{Deserialize, Serialize},
};

/// Audio container/codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    /// Opus in an OGG container, what chat clients expect for voice notes.
    Opus,
}

impl AudioFormat {
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Opus => "audio/ogg",
        }
    }

    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Opus => "ogg",
        }
    }
}

/// Request to synthesize speech from text.
#[derive(Debug, Clone, Default)]
pub struct SynthesizeRequest {
    pub text: String,
    /// Voice ID (provider-specific). Falls back to the provider default.
    pub voice_id: Option<String>,
    /// Model to use (provider-specific).
    pub model: Option<String>,
    /// Stability setting (0.0 - 1.0).
    pub stability: Option<f32>,
    /// Similarity boost (0.0 - 1.0).
    pub similarity_boost: Option<f32>,
}

impl SynthesizeRequest {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Audio produced by a provider.
#[derive(Debug, Clone)]
pub struct AudioOutput {
    pub data: Bytes,
    pub format: AudioFormat,
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Provider identifier (e.g., "elevenlabs").
    fn id(&self) -> &'static str;

    /// Check if the provider has the credentials it needs.
    fn is_configured(&self) -> bool;

    async fn synthesize(&self, request: SynthesizeRequest) -> Result<AudioOutput>;
}
