//! Bounded subprocess execution.
//!
//! Every external tool murmur shells out to (the agent CLI, ffmpeg, whisper)
//! goes through [`run`], which enforces a wall-clock timeout, optionally feeds
//! stdin, and classifies failures so callers can tell a timeout apart from a
//! non-zero exit.

use std::{
    ffi::{OsStr, OsString},
    path::PathBuf,
    process::Stdio,
    time::Duration,
};

use {
    tokio::{io::AsyncWriteExt, process::Command},
    tracing::{debug, warn},
};

/// Maximum number of stderr characters kept in [`ExecError::Failed`].
pub const STDERR_EXCERPT_CHARS: usize = 500;

/// Options controlling a single subprocess run.
#[derive(Debug, Clone)]
pub struct ExecOpts {
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

impl Default for ExecOpts {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            working_dir: None,
            env: Vec::new(),
            stdin: None,
        }
    }
}

impl ExecOpts {
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Captured output of a successful run.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", after.as_secs())]
    Timeout { program: String, after: Duration },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} i/o failed: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Truncate `s` to at most `max` characters.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Run `program` with `args`, killing it if it outlives `opts.timeout`.
pub async fn run<I, S>(
    program: impl AsRef<OsStr>,
    args: I,
    opts: &ExecOpts,
) -> Result<ExecOutput, ExecError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let name = program.to_string_lossy().into_owned();
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();

    debug!(
        program = %name,
        args = args.len(),
        timeout_secs = opts.timeout.as_secs(),
        "exec"
    );

    let mut cmd = Command::new(program);
    cmd.args(&args);
    if let Some(ref dir) = opts.working_dir {
        cmd.current_dir(dir);
    }
    for (k, v) in &opts.env {
        cmd.env(k, v);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(if opts.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: name.clone(),
        source,
    })?;

    if let Some(input) = opts.stdin.clone()
        && let Some(mut stdin) = child.stdin.take()
    {
        // Feed stdin concurrently so a chatty child can't deadlock on a full
        // stdout pipe while we are still writing.
        let program = name.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(program = %program, error = %e, "stdin write failed");
            }
            drop(stdin);
        });
    }

    let output = match tokio::time::timeout(opts.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ExecError::Io {
                program: name,
                source,
            });
        },
        Err(_) => {
            warn!(program = %name, "exec timeout");
            return Err(ExecError::Timeout {
                program: name,
                after: opts.timeout,
            });
        },
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(ExecError::Failed {
            program: name,
            status: output.status.to_string(),
            stderr: truncate_chars(stderr.trim(), STDERR_EXCERPT_CHARS),
        });
    }

    debug!(
        program = %name,
        stdout_len = stdout.len(),
        stderr_len = stderr.len(),
        "exec done"
    );

    Ok(ExecOutput { stdout, stderr })
}
