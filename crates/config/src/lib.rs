//! Configuration loading, env overrides, and startup validation.
//!
//! Config file: `murmur.toml`, searched in `./` then `~/.config/murmur/`.
//! Environment variables (optionally from a `.env` file) override file values.
//!
//! Supports `${ENV_VAR}` substitution in the file.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load, load_config},
    schema::{
        AgentConfig, ElevenLabsConfig, HistoryConfig, MurmurConfig, VoiceConfig, VoiceReplyMode,
        WhatsAppConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
