//! Configuration schema for the murmur daemon.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! runnable configuration; environment variables are layered on top by
//! [`crate::loader::apply_env_overrides`].

use std::path::PathBuf;

use {secrecy::Secret, serde::Deserialize};

/// Suffix appended to bare phone numbers in the allowlist.
pub const WHATSAPP_USER_SUFFIX: &str = "@s.whatsapp.net";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant on WhatsApp. Be concise, \
     direct, and action-oriented. Do not use heavy markdown (no code blocks, no tables). Use \
     *bold* and simple lists when needed.";

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MurmurConfig {
    /// Sender identifiers allowed to talk to the assistant. Empty means nobody.
    pub allowlist: Vec<String>,
    /// Act on messages the account owner sends from another device.
    pub self_chat: bool,
    /// Holds `history/`, `auth_info/` and `media_tmp/`.
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Where the backend writes generated files; attachments may only come from here.
    pub files_dir: PathBuf,
    pub agent: AgentConfig,
    pub history: HistoryConfig,
    pub voice: VoiceConfig,
    pub whatsapp: WhatsAppConfig,
}

impl Default for MurmurConfig {
    fn default() -> Self {
        Self {
            allowlist: Vec::new(),
            self_chat: true,
            data_dir: PathBuf::from("."),
            log_dir: PathBuf::from("./logs"),
            files_dir: PathBuf::from("./files"),
            agent: AgentConfig::default(),
            history: HistoryConfig::default(),
            voice: VoiceConfig::default(),
            whatsapp: WhatsAppConfig::default(),
        }
    }
}

impl MurmurConfig {
    #[must_use]
    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }

    #[must_use]
    pub fn auth_dir(&self) -> PathBuf {
        self.data_dir.join("auth_info")
    }

    #[must_use]
    pub fn media_tmp_dir(&self) -> PathBuf {
        self.data_dir.join("media_tmp")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("agent.log")
    }

    /// Every directory the daemon expects to exist at startup.
    #[must_use]
    pub fn runtime_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.log_dir.clone(),
            self.history_dir(),
            self.auth_dir(),
            self.media_tmp_dir(),
            self.files_dir.clone(),
        ]
    }
}

/// AI backend subprocess settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Explicit CLI path. `None` means look up `claude` on PATH.
    pub binary: Option<PathBuf>,
    /// Working directory for the backend.
    pub project_dir: PathBuf,
    pub model: Option<String>,
    pub max_turns: u32,
    pub timeout_ms: u64,
    pub system_prompt: String,
    /// Headless browser used for HTML-to-PDF conversion.
    pub chrome_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: None,
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            model: Some("sonnet".into()),
            max_turns: 25,
            timeout_ms: 300_000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            chrome_path: default_chrome_path(),
        }
    }
}

impl AgentConfig {
    /// Resolve the backend binary: explicit path, then PATH lookup, then bare `claude`.
    #[must_use]
    pub fn resolved_binary(&self) -> PathBuf {
        if let Some(path) = &self.binary {
            return path.clone();
        }
        which::which("claude").unwrap_or_else(|_| PathBuf::from("claude"))
    }
}

fn default_chrome_path() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")
    } else if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe")
    } else {
        PathBuf::from("/usr/bin/google-chrome")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum stored turns per chat.
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 20 }
    }
}

/// When a reply should be synthesized to speech.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceReplyMode {
    /// Reply with voice only when the request arrived as a voice note.
    #[default]
    Auto,
    Always,
    Never,
}

impl VoiceReplyMode {
    /// Lenient parse; anything unrecognised behaves like `auto`.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "always" => Self::Always,
            "never" => Self::Never,
            _ => Self::Auto,
        }
    }
}

impl std::fmt::Display for VoiceReplyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub reply_mode: VoiceReplyMode,
    pub elevenlabs: ElevenLabsConfig,
    pub ffmpeg_path: Option<PathBuf>,
    pub whisper_path: Option<PathBuf>,
    pub whisper_model: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            reply_mode: VoiceReplyMode::Auto,
            elevenlabs: ElevenLabsConfig::default(),
            ffmpeg_path: None,
            whisper_path: None,
            whisper_model: "base".into(),
        }
    }
}

impl VoiceConfig {
    /// Speech synthesis needs both an API key and a voice.
    #[must_use]
    pub fn tts_configured(&self) -> bool {
        self.elevenlabs.api_key.is_some() && self.elevenlabs.voice_id.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    pub api_key: Option<Secret<String>>,
    pub voice_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Local WebSocket port of the Baileys sidecar.
    pub port: u16,
    pub sidecar_dir: Option<PathBuf>,
    /// Spawn and supervise the sidecar process ourselves.
    pub auto_start: bool,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            port: 3100,
            sidecar_dir: None,
            auto_start: true,
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: 3,
        }
    }
}

/// Normalize an allowlist entry: bare numbers get the user suffix.
#[must_use]
pub fn normalize_allowlist_entry(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains('@') {
        Some(trimmed.to_string())
    } else {
        Some(format!("{trimmed}{WHATSAPP_USER_SUFFIX}"))
    }
}
