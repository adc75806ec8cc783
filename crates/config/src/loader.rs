use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::{MurmurConfig, VoiceReplyMode, normalize_allowlist_entry},
};

/// Standard config file name, checked in `./` then the user config dir.
const CONFIG_FILENAME: &str = "murmur.toml";

/// Load config from the given TOML file, with `${ENV_VAR}` substitution.
pub fn load_config(path: &Path) -> Result<MurmurConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    toml::from_str(&raw).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./murmur.toml` (project-local)
/// 2. `~/.config/murmur/murmur.toml` (user-global)
///
/// Returns `MurmurConfig::default()` if no config file is found.
pub fn discover_and_load() -> MurmurConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    MurmurConfig::default()
}

/// Full load: file (explicit or discovered) and then the process environment.
pub fn load(explicit: Option<&Path>) -> Result<MurmurConfig> {
    let config = match explicit {
        Some(path) => load_config(path)?,
        None => discover_and_load(),
    };
    apply_env_overrides(config)
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    config_dir()
        .map(|dir| dir.join(CONFIG_FILENAME))
        .filter(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/murmur/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "murmur").map(|d| d.config_dir().to_path_buf())
}

/// Layer the process environment over `config`.
pub fn apply_env_overrides(config: MurmurConfig) -> Result<MurmurConfig> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

/// Layer environment-style overrides from `lookup` over `config`.
///
/// Separate from [`apply_env_overrides`] so it can be tested without touching
/// the process environment. Empty values are treated as unset.
pub fn apply_env_overrides_with(
    mut config: MurmurConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<MurmurConfig> {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(numbers) = get("WHATSAPP_NUMBERS") {
        config.allowlist = numbers
            .split(',')
            .filter_map(normalize_allowlist_entry)
            .collect();
    }
    if let Some(dir) = get("PROJECT_DIR") {
        config.agent.project_dir = PathBuf::from(dir);
    }
    if let Some(n) = get("MAX_HISTORY") {
        config.history.max_entries = parse_number("MAX_HISTORY", &n)?;
    }
    if let Some(ms) = get("CLAUDE_TIMEOUT") {
        config.agent.timeout_ms = parse_number("CLAUDE_TIMEOUT", &ms)?;
    }
    if let Some(model) = get("CLAUDE_MODEL") {
        config.agent.model = Some(model);
    }
    if let Some(path) = get("CLAUDE_CLI_PATH") {
        config.agent.binary = Some(PathBuf::from(path));
    }
    if let Some(n) = get("CLAUDE_MAX_TURNS") {
        config.agent.max_turns = parse_number("CLAUDE_MAX_TURNS", &n)?;
    }
    if let Some(prompt) = get("SYSTEM_PROMPT") {
        config.agent.system_prompt = prompt;
    }
    if let Some(path) = get("CHROME_PATH") {
        config.agent.chrome_path = PathBuf::from(path);
    }
    if let Some(flag) = get("SELF_CHAT_MODE") {
        config.self_chat = flag.trim() != "false";
    }
    if let Some(dir) = get("LOG_DIR") {
        config.log_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get("FILES_DIR") {
        config.files_dir = PathBuf::from(dir);
    }
    if let Some(dir) = get("MURMUR_DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
    }
    if let Some(key) = get("ELEVENLABS_API_KEY") {
        config.voice.elevenlabs.api_key = Some(Secret::new(key));
    }
    if let Some(voice) = get("ELEVENLABS_VOICE_ID") {
        config.voice.elevenlabs.voice_id = Some(voice);
    }
    if let Some(mode) = get("VOICE_REPLY_MODE") {
        config.voice.reply_mode = VoiceReplyMode::parse_lenient(&mode);
    }
    if let Some(path) = get("FFMPEG_PATH") {
        config.voice.ffmpeg_path = Some(PathBuf::from(path));
    }
    if let Some(path) = get("WHISPER_PATH") {
        config.voice.whisper_path = Some(PathBuf::from(path));
    }
    if let Some(model) = get("WHISPER_MODEL") {
        config.voice.whisper_model = model;
    }
    if let Some(dir) = get("MURMUR_WHATSAPP_SIDECAR_DIR") {
        config.whatsapp.sidecar_dir = Some(PathBuf::from(dir));
    }
    if let Some(port) = get("MURMUR_WHATSAPP_PORT") {
        config.whatsapp.port = parse_number("MURMUR_WHATSAPP_PORT", &port)?;
    }

    Ok(config)
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| Error::InvalidEnv {
        name,
        value: raw.to_string(),
    })
}
