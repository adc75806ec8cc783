//! Assistant CLI backend.
//!
//! Runs the CLI in non-interactive print mode with the full prompt on stdin
//! and takes trimmed stdout as the reply.

use std::{path::PathBuf, time::Duration};

use {
    async_trait::async_trait,
    murmur_common::{ExecOpts, exec},
    murmur_config::AgentConfig,
    murmur_sessions::HistoryEntry,
    tracing::{debug, info},
};

use crate::{Result, backend::AgentBackend, prompt::PromptBuilder};

pub struct ClaudeCli {
    binary: PathBuf,
    project_dir: PathBuf,
    model: Option<String>,
    max_turns: u32,
    timeout: Duration,
    prompt: PromptBuilder,
}

impl ClaudeCli {
    pub fn new(
        binary: PathBuf,
        project_dir: PathBuf,
        model: Option<String>,
        max_turns: u32,
        timeout: Duration,
        prompt: PromptBuilder,
    ) -> Self {
        Self {
            binary,
            project_dir,
            model,
            max_turns,
            timeout,
            prompt,
        }
    }

    pub fn from_config(config: &AgentConfig, files_dir: PathBuf) -> Self {
        Self::new(
            config.resolved_binary(),
            config.project_dir.clone(),
            config.model.clone().filter(|m| !m.is_empty()),
            config.max_turns,
            Duration::from_millis(config.timeout_ms),
            PromptBuilder {
                system_prompt: config.system_prompt.clone(),
                files_dir,
                chrome_path: config.chrome_path.clone(),
            },
        )
    }

    #[must_use]
    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--dangerously-skip-permissions".to_string(),
            "--max-turns".to_string(),
            self.max_turns.to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        args
    }
}

#[async_trait]
impl AgentBackend for ClaudeCli {
    async fn respond(&self, message: &str, history: &[HistoryEntry]) -> Result<String> {
        let prompt = self.prompt.build(message, history);
        let opts = ExecOpts {
            timeout: self.timeout,
            working_dir: Some(self.project_dir.clone()),
            // Unset the nesting marker so the CLI doesn't refuse to start
            // when murmur itself runs inside an assistant session.
            env: vec![("CLAUDECODE".into(), String::new())],
            stdin: Some(prompt),
        };

        debug!(
            binary = %self.binary.display(),
            history = history.len(),
            message_len = message.len(),
            "invoking backend"
        );

        let output = exec::run(&self.binary, self.args(), &opts).await?;
        let reply = output.stdout.trim().to_string();
        info!(reply_len = reply.len(), "backend replied");
        Ok(reply)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};

    use super::*;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-claude");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn cli(binary: PathBuf, dir: &Path, timeout: Duration) -> ClaudeCli {
        ClaudeCli::new(
            binary,
            dir.to_path_buf(),
            Some("sonnet".into()),
            7,
            timeout,
            PromptBuilder {
                system_prompt: "SYSTEM".into(),
                files_dir: dir.join("files"),
                chrome_path: PathBuf::from("chrome"),
            },
        )
    }

    #[test]
    fn test_args_include_model_when_set() {
        let dir = tempfile::tempdir().unwrap();
        let backend = cli(PathBuf::from("claude"), dir.path(), Duration::from_secs(1));
        assert_eq!(backend.args(), [
            "-p",
            "--dangerously-skip-permissions",
            "--max-turns",
            "7",
            "--model",
            "sonnet"
        ]);

        let mut no_model = backend;
        no_model.model = None;
        assert_eq!(no_model.args().len(), 4);
    }

    #[tokio::test]
    async fn test_prompt_goes_to_stdin_and_reply_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "cat > prompt.txt\necho '  the reply  '");
        let backend = cli(bin, dir.path(), Duration::from_secs(5));

        let reply = backend.respond("what time is it", &[]).await.unwrap();
        assert_eq!(reply, "the reply");

        let prompt = fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
        assert!(prompt.starts_with("SYSTEM\n\n"));
        assert!(prompt.ends_with("Current message: what time is it\n\nRespond:"));
    }

    #[tokio::test]
    async fn test_args_and_env_reach_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "cat > /dev/null\necho \"$@|${CLAUDECODE-unset}|\"");
        let backend = cli(bin, dir.path(), Duration::from_secs(5));

        let reply = backend.respond("hi", &[]).await.unwrap();
        assert_eq!(
            reply,
            "-p --dangerously-skip-permissions --max-turns 7 --model sonnet||"
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "cat > /dev/null\necho 'quota exceeded' >&2\nexit 3");
        let backend = cli(bin, dir.path(), Duration::from_secs(5));

        let err = backend.respond("hi", &[]).await.unwrap_err();
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_timeout_is_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "sleep 5");
        let backend = cli(bin, dir.path(), Duration::from_millis(200));

        let err = backend.respond("hi", &[]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = cli(
            dir.path().join("does-not-exist"),
            dir.path(),
            Duration::from_secs(1),
        );
        let err = backend.respond("hi", &[]).await.unwrap_err();
        assert!(matches!(err, crate::Error::Spawn { .. }));
    }
}
