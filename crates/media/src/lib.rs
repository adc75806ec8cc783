//! Media ingestion: turns voice, image and video messages into prompt text
//! the assistant can act on, tracking every temporary file it creates.

pub mod cleanup;
pub mod ingest;
pub mod mime;

pub use {
    cleanup::CleanupObligations,
    ingest::{IngestOutcome, MediaPipeline, NormalizedRequest, TRANSCRIPTION_FAILED_NOTICE},
    mime::{DEFAULT_MIME, mime_for_path},
};
