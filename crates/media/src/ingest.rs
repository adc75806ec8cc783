//! Normalizing inbound events into prompt text.
//!
//! Each message kind has its own branch. Text passes through; voice notes
//! are transcribed and their intermediates removed before returning; images
//! and videos are saved to disk for the assistant to read, and those files
//! travel with the request as [`CleanupObligations`] until it completes.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, bail},
    murmur_channels::{InboundEvent, MediaSource, MessageKind},
    murmur_voice::{FrameSampling, SttProvider, TranscribeRequest, Transcoder},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::cleanup::CleanupObligations;

/// Voice payloads smaller than this are treated as corrupt.
pub const MIN_VOICE_BYTES: usize = 100;

/// Extracted video audio at or below this size is silence or noise.
pub const MIN_VIDEO_AUDIO_BYTES: u64 = 1000;

pub const TRANSCRIPTION_FAILED_NOTICE: &str =
    "Could not understand the voice note. Please try again or type your message.";

const IMAGE_UNAVAILABLE: &str = "[Image sent but could not be downloaded]";
const VIDEO_UNAVAILABLE: &str = "[Video sent but could not be processed]";
const VIDEO_SUFFIX: &str = "\nAnalyze both the visual frames and audio content of this video.";

/// A unit of work for the dispatcher.
#[derive(Debug)]
pub struct NormalizedRequest {
    pub chat_id: String,
    pub prompt_text: String,
    pub from_self: bool,
    /// Derived from a voice note; drives the `auto` voice-reply policy.
    pub was_voice: bool,
    pub cleanup: CleanupObligations,
}

impl NormalizedRequest {
    #[must_use]
    pub fn text(event: &InboundEvent, prompt_text: impl Into<String>) -> Self {
        Self {
            chat_id: event.chat_id.clone(),
            prompt_text: prompt_text.into(),
            from_self: event.from_self,
            was_voice: false,
            cleanup: CleanupObligations::new(),
        }
    }
}

#[derive(Debug)]
pub enum IngestOutcome {
    Ready(NormalizedRequest),
    /// Tell the chat `notice` and drop the event.
    Rejected { notice: &'static str },
    /// Nothing to act on.
    Dropped,
}

pub struct MediaPipeline {
    source: Arc<dyn MediaSource>,
    stt: Arc<dyn SttProvider>,
    transcoder: Arc<dyn Transcoder>,
    tmp_dir: PathBuf,
}

impl MediaPipeline {
    /// `tmp_dir` is made absolute: the assistant reads saved media from its
    /// own working directory.
    pub fn new(
        source: Arc<dyn MediaSource>,
        stt: Arc<dyn SttProvider>,
        transcoder: Arc<dyn Transcoder>,
        tmp_dir: PathBuf,
    ) -> Self {
        let tmp_dir = std::path::absolute(&tmp_dir).unwrap_or(tmp_dir);
        Self {
            source,
            stt,
            transcoder,
            tmp_dir,
        }
    }

    #[must_use]
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub async fn ingest(&self, event: &InboundEvent) -> IngestOutcome {
        match event.kind {
            MessageKind::Text => match event.body() {
                Some(text) => IngestOutcome::Ready(NormalizedRequest::text(event, text)),
                None => IngestOutcome::Dropped,
            },
            MessageKind::Audio => self.ingest_voice(event).await,
            MessageKind::Image => self.ingest_image(event).await,
            MessageKind::Video => self.ingest_video(event).await,
        }
    }

    async fn ingest_voice(&self, event: &InboundEvent) -> IngestOutcome {
        info!(chat_id = %event.chat_id, "voice note received, transcribing");

        let mut scratch = CleanupObligations::new();
        let result = self.transcribe_voice(event, &mut scratch).await;
        scratch.discharge().await;

        match result {
            Ok(transcript) if transcript.is_empty() => {
                info!(chat_id = %event.chat_id, "empty transcript, dropping voice note");
                IngestOutcome::Dropped
            },
            Ok(transcript) => {
                debug!(chat_id = %event.chat_id, len = transcript.len(), "voice note transcribed");
                let mut request =
                    NormalizedRequest::text(event, format!("[Voice note] {transcript}"));
                request.was_voice = true;
                IngestOutcome::Ready(request)
            },
            Err(e) => {
                warn!(chat_id = %event.chat_id, error = %format!("{e:#}"), "transcription failed");
                IngestOutcome::Rejected {
                    notice: TRANSCRIPTION_FAILED_NOTICE,
                }
            },
        }
    }

    async fn transcribe_voice(
        &self,
        event: &InboundEvent,
        scratch: &mut CleanupObligations,
    ) -> anyhow::Result<String> {
        let id = Uuid::new_v4();
        let ogg = self.tmp_dir.join(format!("voice_{id}.ogg"));
        let wav = self.tmp_dir.join(format!("voice_{id}.wav"));
        scratch.register(&ogg);
        scratch.register(&wav);

        let size = self.save_download(event, &ogg).await?;
        if size < MIN_VOICE_BYTES {
            bail!("downloaded audio too small: {size} bytes");
        }
        self.transcoder.to_speech_wav(&ogg, &wav).await?;
        let transcript = self.stt.transcribe(TranscribeRequest::new(&wav)).await?;
        Ok(transcript.text)
    }

    async fn ingest_image(&self, event: &InboundEvent) -> IngestOutcome {
        info!(chat_id = %event.chat_id, "image received, downloading");

        let caption = event.body();
        let path = self.tmp_dir.join(format!("img_{}.jpg", Uuid::new_v4()));
        let mut cleanup = CleanupObligations::new();
        cleanup.register(&path);

        let prompt = match self.save_download(event, &path).await {
            Ok(_) => image_prompt(&path, caption),
            Err(e) => {
                warn!(chat_id = %event.chat_id, error = %format!("{e:#}"), "image download failed");
                caption.unwrap_or(IMAGE_UNAVAILABLE).to_string()
            },
        };

        let mut request = NormalizedRequest::text(event, prompt);
        request.cleanup = cleanup;
        IngestOutcome::Ready(request)
    }

    async fn ingest_video(&self, event: &InboundEvent) -> IngestOutcome {
        info!(chat_id = %event.chat_id, "video received, downloading");

        let caption = event.body();
        let mut cleanup = CleanupObligations::new();
        let prompt = match self.describe_video(event, caption, &mut cleanup).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(chat_id = %event.chat_id, error = %format!("{e:#}"), "video processing failed");
                caption.unwrap_or(VIDEO_UNAVAILABLE).to_string()
            },
        };

        let mut request = NormalizedRequest::text(event, prompt);
        request.cleanup = cleanup;
        IngestOutcome::Ready(request)
    }

    async fn describe_video(
        &self,
        event: &InboundEvent,
        caption: Option<&str>,
        cleanup: &mut CleanupObligations,
    ) -> anyhow::Result<String> {
        let id = Uuid::new_v4();
        let video = self.tmp_dir.join(format!("vid_{id}.mp4"));
        let frames_dir = self.tmp_dir.join(format!("frames_{id}"));
        let wav = self.tmp_dir.join(format!("vid_audio_{id}.wav"));
        cleanup.register(&video);

        let size = self.save_download(event, &video).await?;
        debug!(chat_id = %event.chat_id, bytes = size, "video downloaded");

        let frames = self.extract_frames(&video, &frames_dir).await;
        for frame in &frames {
            cleanup.register(frame);
        }
        cleanup.register(&frames_dir);

        cleanup.register(&wav);
        let transcript = match self.transcribe_video_audio(&video, &wav).await {
            Ok(t) => t,
            Err(e) => {
                debug!(chat_id = %event.chat_id, error = %format!("{e:#}"), "video audio skipped");
                None
            },
        };

        Ok(video_prompt(&frames, transcript.as_deref(), caption))
    }

    /// Fixed indices first; short clips have too few frames for that, so
    /// fall back to time-based sampling.
    async fn extract_frames(&self, video: &Path, frames_dir: &Path) -> Vec<PathBuf> {
        match self
            .transcoder
            .extract_frames(video, frames_dir, FrameSampling::Indices)
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                debug!(error = %format!("{e:#}"), "index sampling failed, trying interval");
                self.transcoder
                    .extract_frames(video, frames_dir, FrameSampling::Interval)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %format!("{e:#}"), "frame extraction failed");
                        Vec::new()
                    })
            },
        }
    }

    async fn transcribe_video_audio(
        &self,
        video: &Path,
        wav: &Path,
    ) -> anyhow::Result<Option<String>> {
        self.transcoder.extract_audio(video, wav).await?;
        let size = tokio::fs::metadata(wav).await?.len();
        if size <= MIN_VIDEO_AUDIO_BYTES {
            return Ok(None);
        }
        let transcript = self.stt.transcribe(TranscribeRequest::new(wav)).await?;
        Ok(Some(transcript.text).filter(|t| !t.is_empty()))
    }

    /// Download the event's payload to `path`, returning its size.
    async fn save_download(&self, event: &InboundEvent, path: &Path) -> anyhow::Result<usize> {
        let data = self
            .source
            .download(event)
            .await
            .context("media download failed")?;
        tokio::fs::create_dir_all(&self.tmp_dir).await?;
        tokio::fs::write(path, &data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(data.len())
    }
}

fn image_prompt(path: &Path, caption: Option<&str>) -> String {
    let tail = match caption {
        Some(c) => format!("Caption: {c}"),
        None => "No caption provided, describe what you see.".to_string(),
    };
    format!(
        "[Image at: {}] Read the image with your Read tool and analyze it. {tail}",
        path.display()
    )
}

fn video_prompt(frames: &[PathBuf], transcript: Option<&str>, caption: Option<&str>) -> String {
    let mut parts = Vec::new();
    if !frames.is_empty() {
        let list = frames
            .iter()
            .enumerate()
            .map(|(i, f)| format!("Frame {}: {}", i + 1, f.display()))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!(
            "[Video frames]\n{list}\nRead each frame with your Read tool."
        ));
    }
    if let Some(t) = transcript {
        parts.push(format!("[Video audio transcription] {t}"));
    }
    if let Some(c) = caption {
        parts.push(format!("Caption: {c}"));
    }
    if parts.is_empty() {
        parts.push(VIDEO_UNAVAILABLE.to_string());
    }
    parts.join("\n") + VIDEO_SUFFIX
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {
        super::*,
        async_trait::async_trait,
        murmur_voice::Transcript,
    };

    struct FakeSource {
        payload: Option<Vec<u8>>,
    }

    #[async_trait]
    impl MediaSource for FakeSource {
        async fn download(&self, _event: &InboundEvent) -> murmur_channels::Result<Vec<u8>> {
            self.payload
                .clone()
                .ok_or_else(|| murmur_channels::Error::unavailable("media expired"))
        }
    }

    struct FakeStt {
        reply: Result<String, String>,
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl SttProvider for FakeStt {
        fn id(&self) -> &'static str {
            "fake"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn transcribe(&self, request: TranscribeRequest) -> anyhow::Result<Transcript> {
            self.seen.lock().unwrap().push(request.audio_path);
            match &self.reply {
                Ok(text) => Ok(Transcript {
                    text: text.clone(),
                    language: None,
                }),
                Err(e) => bail!("{e}"),
            }
        }
    }

    #[derive(Default)]
    struct FakeTranscoder {
        /// Frames produced per strategy; `None` means the strategy fails.
        index_frames: Option<usize>,
        interval_frames: Option<usize>,
        audio_bytes: Option<usize>,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn to_speech_wav(&self, _input: &Path, output: &Path) -> anyhow::Result<()> {
            tokio::fs::write(output, b"wav").await?;
            Ok(())
        }

        async fn extract_frames(
            &self,
            _video: &Path,
            out_dir: &Path,
            sampling: FrameSampling,
        ) -> anyhow::Result<Vec<PathBuf>> {
            let count = match sampling {
                FrameSampling::Indices => self.index_frames,
                FrameSampling::Interval => self.interval_frames,
            };
            let Some(count) = count else {
                bail!("{sampling:?} failed");
            };
            tokio::fs::create_dir_all(out_dir).await?;
            let mut frames = Vec::new();
            for n in 1..=count {
                let frame = out_dir.join(format!("frame_{n:02}.jpg"));
                tokio::fs::write(&frame, b"jpg").await?;
                frames.push(frame);
            }
            Ok(frames)
        }

        async fn extract_audio(&self, _video: &Path, output: &Path) -> anyhow::Result<()> {
            let Some(bytes) = self.audio_bytes else {
                bail!("no audio stream");
            };
            tokio::fs::write(output, vec![0u8; bytes]).await?;
            Ok(())
        }

        async fn to_opus(&self, _input: &Path, _output: &Path) -> anyhow::Result<()> {
            unreachable!()
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        pipeline: MediaPipeline,
    }

    fn harness(
        payload: Option<Vec<u8>>,
        stt: Result<&str, &str>,
        transcoder: FakeTranscoder,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = MediaPipeline::new(
            Arc::new(FakeSource { payload }),
            Arc::new(FakeStt {
                reply: stt.map(Into::into).map_err(Into::into),
                seen: Mutex::new(Vec::new()),
            }),
            Arc::new(transcoder),
            dir.path().join("media_tmp"),
        );
        Harness { dir, pipeline }
    }

    fn event(kind: MessageKind, text: Option<&str>, caption: Option<&str>) -> InboundEvent {
        InboundEvent {
            message_id: "m1".into(),
            chat_id: "1@s.whatsapp.net".into(),
            sender_id: "1@s.whatsapp.net".into(),
            from_self: false,
            kind,
            text: text.map(Into::into),
            caption: caption.map(Into::into),
        }
    }

    fn ready(outcome: IngestOutcome) -> NormalizedRequest {
        match outcome {
            IngestOutcome::Ready(r) => r,
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    fn tmp_entries(h: &Harness) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(h.dir.path().join("media_tmp"))
            .map(|rd| {
                rd.map(|e| e.unwrap().file_name().into_string().unwrap())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_text_passes_through() {
        let h = harness(None, Ok(""), FakeTranscoder::default());
        let req = ready(
            h.pipeline
                .ingest(&event(MessageKind::Text, Some("hello"), None))
                .await,
        );
        assert_eq!(req.prompt_text, "hello");
        assert!(!req.was_voice);
        assert!(req.cleanup.is_empty());

        let empty = h
            .pipeline
            .ingest(&event(MessageKind::Text, None, None))
            .await;
        assert!(matches!(empty, IngestOutcome::Dropped));
    }

    #[tokio::test]
    async fn test_voice_note_transcribed_and_scrubbed() {
        let h = harness(
            Some(vec![1u8; 500]),
            Ok("what's the weather"),
            FakeTranscoder::default(),
        );
        let req = ready(
            h.pipeline
                .ingest(&event(MessageKind::Audio, None, None))
                .await,
        );
        assert_eq!(req.prompt_text, "[Voice note] what's the weather");
        assert!(req.was_voice);
        assert!(req.cleanup.is_empty());
        assert!(tmp_entries(&h).is_empty());
    }

    #[tokio::test]
    async fn test_tiny_voice_payload_is_rejected() {
        let h = harness(Some(vec![1u8; 40]), Ok("ignored"), FakeTranscoder::default());
        let outcome = h
            .pipeline
            .ingest(&event(MessageKind::Audio, None, None))
            .await;
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected {
                notice: TRANSCRIPTION_FAILED_NOTICE
            }
        ));
        assert!(tmp_entries(&h).is_empty());
    }

    #[tokio::test]
    async fn test_voice_stt_failure_is_rejected() {
        let h = harness(Some(vec![1u8; 500]), Err("model crashed"), FakeTranscoder::default());
        let outcome = h
            .pipeline
            .ingest(&event(MessageKind::Audio, None, None))
            .await;
        assert!(matches!(outcome, IngestOutcome::Rejected { .. }));
        assert!(tmp_entries(&h).is_empty());
    }

    #[tokio::test]
    async fn test_empty_transcript_is_dropped() {
        let h = harness(Some(vec![1u8; 500]), Ok(""), FakeTranscoder::default());
        let outcome = h
            .pipeline
            .ingest(&event(MessageKind::Audio, None, None))
            .await;
        assert!(matches!(outcome, IngestOutcome::Dropped));
    }

    #[tokio::test]
    async fn test_image_saved_until_request_completes() {
        let h = harness(Some(b"jpeg".to_vec()), Ok(""), FakeTranscoder::default());
        let req = ready(
            h.pipeline
                .ingest(&event(MessageKind::Image, None, Some("what is this?")))
                .await,
        );

        let saved = &req.cleanup.paths()[0];
        assert!(saved.is_absolute());
        assert!(saved.exists());
        assert_eq!(
            req.prompt_text,
            format!(
                "[Image at: {}] Read the image with your Read tool and analyze it. Caption: what is this?",
                saved.display()
            )
        );

        req.cleanup.discharge().await;
        assert!(tmp_entries(&h).is_empty());
    }

    #[tokio::test]
    async fn test_image_without_caption() {
        let h = harness(Some(b"jpeg".to_vec()), Ok(""), FakeTranscoder::default());
        let req = ready(
            h.pipeline
                .ingest(&event(MessageKind::Image, None, None))
                .await,
        );
        assert!(
            req.prompt_text
                .ends_with("No caption provided, describe what you see.")
        );
    }

    #[tokio::test]
    async fn test_image_download_failure_degrades() {
        let h = harness(None, Ok(""), FakeTranscoder::default());
        let req = ready(
            h.pipeline
                .ingest(&event(MessageKind::Image, None, None))
                .await,
        );
        assert_eq!(req.prompt_text, IMAGE_UNAVAILABLE);

        let captioned = ready(
            h.pipeline
                .ingest(&event(MessageKind::Image, None, Some("my receipt")))
                .await,
        );
        assert_eq!(captioned.prompt_text, "my receipt");
    }

    #[tokio::test]
    async fn test_video_frames_audio_and_caption() {
        let h = harness(Some(vec![0u8; 4096]), Ok("nice view"), FakeTranscoder {
            index_frames: Some(4),
            interval_frames: None,
            audio_bytes: Some(5000),
        });
        let req = ready(
            h.pipeline
                .ingest(&event(MessageKind::Video, None, Some("holiday")))
                .await,
        );

        let text = &req.prompt_text;
        assert!(text.starts_with("[Video frames]\nFrame 1: "));
        assert!(text.contains("Frame 4: "));
        assert!(text.contains("Read each frame with your Read tool.\n[Video audio transcription] nice view\nCaption: holiday"));
        assert!(text.ends_with(VIDEO_SUFFIX));

        // video + 4 frames + frames dir + audio
        assert_eq!(req.cleanup.paths().len(), 7);
        req.cleanup.discharge().await;
        assert!(tmp_entries(&h).is_empty());
    }

    #[tokio::test]
    async fn test_video_falls_back_to_interval_sampling() {
        let h = harness(Some(vec![0u8; 4096]), Ok("unused"), FakeTranscoder {
            index_frames: None,
            interval_frames: Some(2),
            audio_bytes: Some(200),
        });
        let req = ready(
            h.pipeline
                .ingest(&event(MessageKind::Video, None, None))
                .await,
        );
        assert!(req.prompt_text.contains("Frame 2: "));
        assert!(!req.prompt_text.contains("Frame 3: "));
        // Audio under the noise threshold isn't transcribed.
        assert!(!req.prompt_text.contains("[Video audio transcription]"));
    }

    #[tokio::test]
    async fn test_video_with_nothing_usable() {
        let h = harness(Some(vec![0u8; 4096]), Ok(""), FakeTranscoder::default());
        let req = ready(
            h.pipeline
                .ingest(&event(MessageKind::Video, None, None))
                .await,
        );
        assert_eq!(req.prompt_text, format!("{VIDEO_UNAVAILABLE}{VIDEO_SUFFIX}"));
        req.cleanup.discharge().await;
        assert!(tmp_entries(&h).is_empty());
    }

    #[tokio::test]
    async fn test_video_download_failure_degrades() {
        let h = harness(None, Ok(""), FakeTranscoder::default());
        let req = ready(
            h.pipeline
                .ingest(&event(MessageKind::Video, None, None))
                .await,
        );
        assert_eq!(req.prompt_text, VIDEO_UNAVAILABLE);
    }
}
