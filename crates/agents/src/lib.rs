//! AI backend: the subprocess contract for the assistant CLI and the
//! prompt it is fed.

pub mod backend;
pub mod claude_cli;
pub mod error;
pub mod prompt;

pub use {
    backend::AgentBackend,
    claude_cli::ClaudeCli,
    error::{Error, Result},
    prompt::PromptBuilder,
};
