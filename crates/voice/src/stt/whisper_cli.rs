//! OpenAI Whisper CLI provider.
//!
//! Wraps the `whisper` command from the `openai-whisper` Python package,
//! which writes its transcript to `<output_dir>/<input stem>.txt`.
//!
//! Installation: `pip install openai-whisper` (needs ffmpeg on PATH).

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    anyhow::{Context, Result, anyhow},
    async_trait::async_trait,
    murmur_common::{ExecOpts, exec},
    tracing::debug,
};

use super::{SttProvider, TranscribeRequest, Transcript, cli_utils};

const BINARY_NAME: &str = "whisper";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "base";

/// Wall-clock bound for one transcription.
pub const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct WhisperCli {
    binary_path: Option<PathBuf>,
    model: String,
    timeout: Duration,
}

impl Default for WhisperCli {
    fn default() -> Self {
        Self::new(None, DEFAULT_MODEL)
    }
}

impl WhisperCli {
    #[must_use]
    pub fn new(binary_path: Option<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            binary_path,
            model: model.into(),
            timeout: TRANSCRIBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn find_binary(&self) -> Option<PathBuf> {
        cli_utils::find_binary(BINARY_NAME, self.binary_path.as_deref())
    }

    fn args(&self, audio: &Path, output_dir: &Path, language: Option<&str>) -> Vec<String> {
        let mut args = vec![
            audio.display().to_string(),
            "--model".into(),
            self.model.clone(),
            "--output_format".into(),
            "txt".into(),
            "--output_dir".into(),
            output_dir.display().to_string(),
        ];
        if let Some(lang) = language {
            args.push("--language".into());
            args.push(lang.into());
        }
        args
    }
}

#[async_trait]
impl SttProvider for WhisperCli {
    fn id(&self) -> &'static str {
        "whisper"
    }

    fn is_configured(&self) -> bool {
        self.find_binary().is_some()
    }

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript> {
        let binary = self
            .find_binary()
            .ok_or_else(|| anyhow!("whisper binary not found in PATH"))?;

        let mut txt_name = request
            .audio_path
            .file_stem()
            .ok_or_else(|| anyhow!("audio path has no file name"))?
            .to_os_string();
        txt_name.push(".txt");

        // Transcript lands beside the audio in a scratch dir that is removed
        // when this function returns, success or not.
        let parent = request
            .audio_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let out_dir = tempfile::Builder::new()
            .prefix("whisper_")
            .tempdir_in(parent)
            .context("failed to create whisper output dir")?;

        let args = self.args(
            &request.audio_path,
            out_dir.path(),
            request.language.as_deref(),
        );
        exec::run(&binary, &args, &ExecOpts::with_timeout(self.timeout))
            .await
            .context("whisper failed")?;

        let txt = out_dir.path().join(txt_name);
        let text = match tokio::fs::read_to_string(&txt).await {
            Ok(raw) => raw.trim().to_string(),
            Err(e) => {
                debug!(path = %txt.display(), error = %e, "whisper produced no transcript");
                String::new()
            },
        };

        Ok(Transcript {
            text,
            language: request.language,
        })
    }
}
