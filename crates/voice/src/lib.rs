//! Voice capabilities for murmur: speech-to-text for inbound voice notes and
//! video audio, text-to-speech for voice replies, and the ffmpeg transcoding
//! that glues both to the chat's audio formats.

pub mod stt;
pub mod transcode;
pub mod tts;
pub mod voice_note;

pub use {
    stt::{SttProvider, TranscribeRequest, Transcript, WhisperCli},
    transcode::{Ffmpeg, FrameSampling, Transcoder},
    tts::{AudioFormat, AudioOutput, ElevenLabsTts, SynthesizeRequest, TtsProvider},
    voice_note::{TtsVoiceNotes, VOICE_NOTE_MIME, VoiceNote, VoiceNoteSynth},
};
