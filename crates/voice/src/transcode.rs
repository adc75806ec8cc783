//! ffmpeg-backed transcoding.
//!
//! Everything murmur does to audio and video goes through [`Transcoder`], so
//! the media pipeline can be tested without ffmpeg installed.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    murmur_common::{ExecOpts, exec},
    tracing::debug,
};

use crate::stt::find_binary;

/// Upper bound on frames pulled from one video.
pub const MAX_FRAMES: usize = 4;

/// Frame indices sampled by [`FrameSampling::Indices`].
pub const FRAME_INDICES: [u32; 4] = [0, 30, 60, 90];

/// Seconds between frames for [`FrameSampling::Interval`].
pub const FRAME_INTERVAL_SECS: u32 = 2;

const AUDIO_TIMEOUT: Duration = Duration::from_secs(30);
const VIDEO_TIMEOUT: Duration = Duration::from_secs(30);

/// How representative frames are picked from a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSampling {
    /// Fixed frame numbers ([`FRAME_INDICES`]). Yields nothing useful on
    /// very short clips.
    Indices,
    /// One frame every [`FRAME_INTERVAL_SECS`] seconds.
    Interval,
}

impl FrameSampling {
    fn filter(self) -> String {
        match self {
            Self::Indices => {
                let select = FRAME_INDICES
                    .iter()
                    .map(|n| format!("eq(n\\,{n})"))
                    .collect::<Vec<_>>()
                    .join("+");
                format!("select='{select}',setpts=N/FRAME_RATE/TB")
            },
            Self::Interval => format!("fps=1/{FRAME_INTERVAL_SECS}"),
        }
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert any audio to 16 kHz mono WAV for speech recognition.
    async fn to_speech_wav(&self, input: &Path, output: &Path) -> Result<()>;

    /// Write up to [`MAX_FRAMES`] JPEG frames into `out_dir` and return their
    /// paths in order. Fails if no frame was produced.
    async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        sampling: FrameSampling,
    ) -> Result<Vec<PathBuf>>;

    /// Extract a video's audio track as 16 kHz mono WAV.
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()>;

    /// Encode audio as Opus in OGG, the voice-note format.
    async fn to_opus(&self, input: &Path, output: &Path) -> Result<()>;
}

/// [`Transcoder`] that shells out to the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Ffmpeg {
    /// Use `configured` if it exists, else `ffmpeg` from PATH.
    #[must_use]
    pub fn new(configured: Option<&Path>) -> Self {
        let binary =
            find_binary("ffmpeg", configured).unwrap_or_else(|| PathBuf::from("ffmpeg"));
        Self { binary }
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    async fn ffmpeg(&self, args: Vec<String>, timeout: Duration) -> Result<()> {
        exec::run(&self.binary, &args, &ExecOpts::with_timeout(timeout))
            .await
            .context("ffmpeg failed")?;
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Sorted `*.jpg` files in `dir`.
pub async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "jpg") {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

#[async_trait]
impl Transcoder for Ffmpeg {
    async fn to_speech_wav(&self, input: &Path, output: &Path) -> Result<()> {
        self.ffmpeg(
            vec![
                "-i".into(),
                path_arg(input),
                "-ar".into(),
                "16000".into(),
                "-ac".into(),
                "1".into(),
                path_arg(output),
                "-y".into(),
            ],
            AUDIO_TIMEOUT,
        )
        .await
    }

    async fn extract_frames(
        &self,
        video: &Path,
        out_dir: &Path,
        sampling: FrameSampling,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(out_dir).await?;
        let pattern = out_dir.join("frame_%02d.jpg");
        self.ffmpeg(
            vec![
                "-i".into(),
                path_arg(video),
                "-vf".into(),
                sampling.filter(),
                "-frames:v".into(),
                MAX_FRAMES.to_string(),
                path_arg(&pattern),
                "-y".into(),
            ],
            VIDEO_TIMEOUT,
        )
        .await?;

        let frames = list_frames(out_dir).await?;
        debug!(?sampling, count = frames.len(), "frames extracted");
        if frames.is_empty() {
            bail!("ffmpeg produced no frames");
        }
        Ok(frames)
    }

    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        self.ffmpeg(
            vec![
                "-i".into(),
                path_arg(video),
                "-vn".into(),
                "-ar".into(),
                "16000".into(),
                "-ac".into(),
                "1".into(),
                path_arg(output),
                "-y".into(),
            ],
            VIDEO_TIMEOUT,
        )
        .await
    }

    async fn to_opus(&self, input: &Path, output: &Path) -> Result<()> {
        self.ffmpeg(
            vec![
                "-i".into(),
                path_arg(input),
                "-c:a".into(),
                "libopus".into(),
                "-b:a".into(),
                "64k".into(),
                path_arg(output),
                "-y".into(),
            ],
            AUDIO_TIMEOUT,
        )
        .await
    }
}
