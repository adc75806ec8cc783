//! Startup validation.
//!
//! Checks a loaded [`MurmurConfig`] for settings that will silently degrade
//! the daemon (empty allowlist, missing tools, voice replies without a
//! synthesizer) and reports them as diagnostics. Only `Error` diagnostics
//! should stop the process.

use std::path::Path;

use crate::schema::{MurmurConfig, VoiceReplyMode};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "access", "agent", "history", "voice", "media"
    pub category: &'static str,
    /// Dotted path, e.g. "voice.reply_mode"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: &str,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate `config` against the local machine.
#[must_use]
pub fn validate(config: &MurmurConfig) -> ValidationResult {
    validate_with(config, |name| which::which(name).is_ok())
}

/// Same as [`validate`] with an injectable PATH probe.
pub fn validate_with(config: &MurmurConfig, on_path: impl Fn(&str) -> bool) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.allowlist.is_empty() {
        result.push(
            Severity::Warning,
            "access",
            "allowlist",
            "allowlist is empty; every inbound message will be ignored (set WHATSAPP_NUMBERS)",
        );
    }

    check_agent(config, &on_path, &mut result);

    if config.history.max_entries == 0 {
        result.push(
            Severity::Warning,
            "history",
            "history.max_entries",
            "history cap is 0; conversations will carry no context",
        );
    }

    check_voice(config, &on_path, &mut result);

    result
}

fn check_agent(
    config: &MurmurConfig,
    on_path: &impl Fn(&str) -> bool,
    result: &mut ValidationResult,
) {
    match &config.agent.binary {
        Some(path) if !path_resolves(path, on_path) => result.push(
            Severity::Error,
            "agent",
            "agent.binary",
            format!("backend binary not found: {}", path.display()),
        ),
        Some(_) => {},
        None if on_path("claude") => result.push(
            Severity::Info,
            "agent",
            "agent.binary",
            "using `claude` from PATH",
        ),
        None => result.push(
            Severity::Warning,
            "agent",
            "agent.binary",
            "`claude` not found on PATH; set CLAUDE_CLI_PATH",
        ),
    }

    if !config.agent.project_dir.is_dir() {
        result.push(
            Severity::Error,
            "agent",
            "agent.project_dir",
            format!(
                "project directory does not exist: {}",
                config.agent.project_dir.display()
            ),
        );
    }

    if config.agent.timeout_ms == 0 {
        result.push(
            Severity::Error,
            "agent",
            "agent.timeout_ms",
            "backend timeout must be greater than zero",
        );
    }
}

fn check_voice(
    config: &MurmurConfig,
    on_path: &impl Fn(&str) -> bool,
    result: &mut ValidationResult,
) {
    let voice = &config.voice;

    if !voice.tts_configured() {
        result.push(
            Severity::Info,
            "voice",
            "voice.elevenlabs",
            "ElevenLabs not configured; voice replies disabled",
        );
        if voice.reply_mode != VoiceReplyMode::Never {
            result.push(
                Severity::Warning,
                "voice",
                "voice.reply_mode",
                format!(
                    "reply mode is `{}` but speech synthesis is unavailable; replies fall back to text",
                    voice.reply_mode
                ),
            );
        }
    }

    let ffmpeg_ok = match &voice.ffmpeg_path {
        Some(path) => path_resolves(path, on_path),
        None => on_path("ffmpeg"),
    };
    if !ffmpeg_ok {
        result.push(
            Severity::Warning,
            "media",
            "voice.ffmpeg_path",
            "ffmpeg not found; voice notes and videos cannot be processed",
        );
    }

    let whisper_ok = match &voice.whisper_path {
        Some(path) => path_resolves(path, on_path),
        None => on_path("whisper"),
    };
    if !whisper_ok {
        result.push(
            Severity::Warning,
            "media",
            "voice.whisper_path",
            "whisper not found; voice notes cannot be transcribed",
        );
    }
}

fn path_resolves(path: &Path, on_path: &impl Fn(&str) -> bool) -> bool {
    if path.exists() {
        return true;
    }
    // A bare name like `claude` is looked up on PATH.
    path.components().count() == 1 && path.to_str().is_some_and(on_path)
}
