//! Turning a backend reply into outbound messages.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use {
    murmur_channels::{ChannelOutbound, OutboundDocument},
    murmur_config::VoiceReplyMode,
    murmur_media::mime_for_path,
    murmur_voice::VoiceNoteSynth,
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    chunk::{MAX_CHUNK_CHARS, split_message},
};

const FILE_TAG_OPEN: &str = "[FILE:";

/// A reply with its file tags pulled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    /// Display text: tags removed, runs of blank lines collapsed, trimmed.
    pub text: String,
    /// Paths named by `[FILE:<path>]` tags, in order of appearance.
    pub files: Vec<String>,
}

/// Extract `[FILE:<path>]` tags. The path runs to the first `]`; an
/// unterminated tag is left in the text.
#[must_use]
pub fn parse_reply(raw: &str) -> ParsedReply {
    let mut text = String::with_capacity(raw.len());
    let mut files = Vec::new();
    let mut rest = raw;

    while let Some(start) = rest.find(FILE_TAG_OPEN) {
        let after_open = &rest[start + FILE_TAG_OPEN.len()..];
        let Some(end) = after_open.find(']') else {
            break;
        };
        text.push_str(&rest[..start]);
        let path = after_open[..end].trim();
        if !path.is_empty() {
            files.push(path.to_string());
        }
        rest = &after_open[end + 1..];
    }
    text.push_str(rest);

    ParsedReply {
        text: collapse_blank_lines(&text).trim().to_string(),
        files,
    }
}

/// Replace every run of three or more newlines with two.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(c);
    }
    out
}

/// Whether the reply goes out as a voice note.
#[must_use]
pub fn should_reply_with_voice(mode: VoiceReplyMode, was_voice: bool, synth_available: bool) -> bool {
    synth_available
        && match mode {
            VoiceReplyMode::Always => true,
            VoiceReplyMode::Auto => was_voice,
            VoiceReplyMode::Never => false,
        }
}

/// Result of checking a file reference against the permitted roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Egress {
    Allowed(PathBuf),
    /// Inside a root but nothing is there.
    Missing(PathBuf),
    Blocked,
}

/// Only files under one of the permitted roots may leave the machine.
#[derive(Debug, Clone)]
pub struct EgressGate {
    roots: Vec<PathBuf>,
}

impl EgressGate {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .filter_map(|r| absolute_normalized(r.as_ref()))
            .collect();
        Self { roots }
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve `raw` and decide whether it may be sent.
    ///
    /// `..` segments are resolved lexically before the prefix check. When
    /// the file exists, symlinks are resolved and the check is repeated so a
    /// link inside a root cannot point outside it.
    #[must_use]
    pub fn check(&self, raw: &str) -> Egress {
        let Some(resolved) = absolute_normalized(Path::new(raw)) else {
            return Egress::Blocked;
        };
        if !self.within_roots(&resolved, false) {
            return Egress::Blocked;
        }
        match resolved.canonicalize() {
            Ok(real) if real.is_file() && self.within_roots(&real, true) => Egress::Allowed(real),
            Ok(real) if real.is_file() => Egress::Blocked,
            _ => Egress::Missing(resolved),
        }
    }

    fn within_roots(&self, path: &Path, canonical: bool) -> bool {
        self.roots.iter().any(|root| {
            if canonical {
                root.canonicalize()
                    .is_ok_and(|root| path.starts_with(&root))
            } else {
                path.starts_with(root)
            }
        })
    }
}

/// Make `path` absolute against the working directory and fold away `.`
/// and `..` without touching the filesystem.
fn absolute_normalized(path: &Path) -> Option<PathBuf> {
    let absolute = std::path::absolute(path).ok()?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str());
            },
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
        }
    }
    Some(out)
}

/// Delivers a backend reply: voice or chunked text, then attachments.
pub struct Responder {
    outbound: Arc<dyn ChannelOutbound>,
    voice: Option<Arc<dyn VoiceNoteSynth>>,
    mode: VoiceReplyMode,
    gate: EgressGate,
}

impl Responder {
    pub fn new(
        outbound: Arc<dyn ChannelOutbound>,
        voice: Option<Arc<dyn VoiceNoteSynth>>,
        mode: VoiceReplyMode,
        gate: EgressGate,
    ) -> Self {
        Self {
            outbound,
            voice,
            mode,
            gate,
        }
    }

    /// Send `text` as ordered chunks, each acknowledged before the next.
    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_CHUNK_CHARS) {
            self.outbound.send_text(chat_id, &chunk).await?;
        }
        Ok(())
    }

    pub async fn deliver(&self, chat_id: &str, raw_reply: &str, was_voice: bool) -> Result<()> {
        let reply = parse_reply(raw_reply);

        if !reply.text.is_empty() {
            let voice = self.voice.as_ref().filter(|synth| {
                should_reply_with_voice(self.mode, was_voice, synth.is_available())
            });
            match voice {
                Some(synth) => {
                    if let Err(e) = self.send_voice(synth.as_ref(), chat_id, &reply.text).await {
                        warn!(chat_id, error = %e, "voice reply failed, sending text");
                        self.send_text(chat_id, &reply.text).await?;
                    }
                },
                None => self.send_text(chat_id, &reply.text).await?,
            }
        }

        for file in &reply.files {
            self.send_attachment(chat_id, file).await?;
        }
        Ok(())
    }

    async fn send_voice(
        &self,
        synth: &dyn VoiceNoteSynth,
        chat_id: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        debug!(chat_id, "generating voice reply");
        let note = synth.synthesize(text).await?;
        self.outbound
            .send_voice_note(chat_id, &note.data, &note.mime_type)
            .await?;
        info!(chat_id, bytes = note.data.len(), "voice reply sent");
        Ok(())
    }

    async fn send_attachment(&self, chat_id: &str, raw: &str) -> Result<()> {
        let path = match self.gate.check(raw) {
            Egress::Allowed(path) => path,
            Egress::Missing(path) => {
                warn!(chat_id, path = %path.display(), "referenced file not found");
                return Ok(());
            },
            Egress::Blocked => {
                warn!(chat_id, path = raw, "blocked file outside allowed directories");
                return Ok(());
            },
        };

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(chat_id, path = %path.display(), error = %e, "could not read attachment");
                return Ok(());
            },
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());
        let document = OutboundDocument {
            data,
            mime_type: mime_for_path(&path).to_string(),
            file_name,
        };
        self.outbound.send_document(chat_id, &document).await?;
        info!(chat_id, file = %document.file_name, "file sent");
        Ok(())
    }
}
