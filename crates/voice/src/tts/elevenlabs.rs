//! ElevenLabs TTS provider.
//!
//! Uses the multilingual v2 model so replies in any language the assistant
//! answers in come out with a natural accent.

use {
    anyhow::{Context, Result, anyhow},
    async_trait::async_trait,
    reqwest::Client,
    secrecy::{ExposeSecret, Secret},
    serde::Serialize,
    tracing::debug,
};

use super::{AudioFormat, AudioOutput, SynthesizeRequest, TtsProvider};

/// ElevenLabs API base URL.
pub const API_BASE: &str = "https://api.elevenlabs.io/v1";

const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
const DEFAULT_STABILITY: f32 = 0.5;
const DEFAULT_SIMILARITY_BOOST: f32 = 0.75;

#[derive(Clone)]
pub struct ElevenLabsTts {
    client: Client,
    api_base: String,
    api_key: Option<Secret<String>>,
    voice_id: Option<String>,
    model: String,
}

impl std::fmt::Debug for ElevenLabsTts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsTts")
            .field("api_base", &self.api_base)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model", &self.model)
            .finish()
    }
}

impl ElevenLabsTts {
    #[must_use]
    pub fn new(api_key: Option<Secret<String>>, voice_id: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: API_BASE.into(),
            api_key,
            voice_id: voice_id.filter(|v| !v.is_empty()),
            model: DEFAULT_MODEL.into(),
        }
    }

    /// Point the provider at a different API root (tests, proxies).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_key(&self) -> Result<&Secret<String>> {
        self.api_key
            .as_ref()
            .ok_or_else(|| anyhow!("ElevenLabs API key not configured"))
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsTts {
    fn id(&self) -> &'static str {
        "elevenlabs"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.voice_id.is_some()
    }

    async fn synthesize(&self, request: SynthesizeRequest) -> Result<AudioOutput> {
        let api_key = self.api_key()?;
        let voice_id = request
            .voice_id
            .as_deref()
            .or(self.voice_id.as_deref())
            .ok_or_else(|| anyhow!("ElevenLabs voice id not configured"))?;

        let body = TtsRequest {
            text: &request.text,
            model_id: request.model.as_deref().unwrap_or(&self.model),
            voice_settings: VoiceSettings {
                stability: request.stability.unwrap_or(DEFAULT_STABILITY),
                similarity_boost: request.similarity_boost.unwrap_or(DEFAULT_SIMILARITY_BOOST),
            },
        };

        debug!(voice_id, text_len = request.text.len(), "elevenlabs synthesize");

        let response = self
            .client
            .post(format!("{}/text-to-speech/{voice_id}", self.api_base))
            .header("xi-api-key", api_key.expose_secret())
            .header("Accept", AudioFormat::Mp3.mime_type())
            .json(&body)
            .send()
            .await
            .context("failed to send ElevenLabs TTS request")?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("ElevenLabs API {}: {body}", status.as_u16()));
        }

        let data = response
            .bytes()
            .await
            .context("failed to read ElevenLabs TTS response")?;

        Ok(AudioOutput {
            data,
            format: AudioFormat::Mp3,
        })
    }
}

// ── API Types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{body_json, header, method, path},
        },
    };

    fn provider(server: &MockServer) -> ElevenLabsTts {
        ElevenLabsTts::new(Some(Secret::new("test-key".into())), Some("voice1".into()))
            .with_api_base(format!("{}/v1", server.uri()))
    }

    #[test]
    fn test_configured_needs_key_and_voice() {
        assert!(!ElevenLabsTts::new(None, Some("v".into())).is_configured());
        assert!(!ElevenLabsTts::new(Some(Secret::new("k".into())), None).is_configured());
        assert!(!ElevenLabsTts::new(Some(Secret::new("k".into())), Some(String::new())).is_configured());
        assert!(ElevenLabsTts::new(Some(Secret::new("k".into())), Some("v".into())).is_configured());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let provider = ElevenLabsTts::new(Some(Secret::new("super-secret-key".into())), None);
        let debug_output = format!("{provider:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super-secret-key"));
    }

    #[tokio::test]
    async fn test_synthesize_request_shape() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/text-to-speech/voice1"))
            .and(header("xi-api-key", "test-key"))
            .and(header("accept", "audio/mpeg"))
            .and(body_json(serde_json::json!({
                "text": "Hello",
                "model_id": "eleven_multilingual_v2",
                "voice_settings": { "stability": 0.5, "similarity_boost": 0.75 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3fake".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let out = provider(&server)
            .synthesize(SynthesizeRequest::text("Hello"))
            .await
            .unwrap();
        assert_eq!(out.format, AudioFormat::Mp3);
        assert_eq!(&out.data[..], b"ID3fake");
    }

    #[tokio::test]
    async fn test_non_200_carries_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .synthesize(SynthesizeRequest::text("Hello"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ElevenLabs API 401: invalid api key");
    }

    #[tokio::test]
    async fn test_synthesize_without_api_key() {
        let provider = ElevenLabsTts::new(None, Some("v".into()));
        let err = provider
            .synthesize(SynthesizeRequest::text("Hello"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
