//! Lifecycle of the Node.js Baileys sidecar process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    murmur_common::is_noise,
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

use crate::sidecar::DEFAULT_SIDECAR_PORT;

pub const SIDECAR_DIR_ENV: &str = "MURMUR_WHATSAPP_SIDECAR_DIR";
pub const SIDECAR_PORT_ENV: &str = "MURMUR_WHATSAPP_PORT";
pub const SIDECAR_AUTH_DIR_ENV: &str = "MURMUR_WHATSAPP_AUTH_DIR";

const SIDECAR_REL_DIR: &str = "sidecar/whatsapp-baileys";
const SIDECAR_ENTRY: &str = "dist/index.js";

/// A transport process the supervisor can bring back after it dies.
#[async_trait]
pub trait ManagedSidecar: Send {
    fn is_running(&mut self) -> bool;

    /// Replace the process with a freshly spawned one.
    async fn restart(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;
}

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
    config: SidecarConfig,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then kill if the process has not exited within 5s.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping WhatsApp sidecar process");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id()
                && let Ok(pid) = i32::try_from(pid)
            {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill().await;
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "WhatsApp sidecar process exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
            Err(_) => {
                warn!("sidecar process did not exit gracefully, killing");
                let _ = self.child.kill().await;
            },
        }
        Ok(())
    }
}

#[async_trait]
impl ManagedSidecar for SidecarProcess {
    fn is_running(&mut self) -> bool {
        SidecarProcess::is_running(self)
    }

    async fn restart(&mut self) -> Result<()> {
        SidecarProcess::stop(self).await?;
        *self = start_sidecar(self.config.clone()).await?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        SidecarProcess::stop(self).await
    }
}

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory containing the sidecar's `package.json`.
    pub sidecar_dir: PathBuf,
    pub port: u16,
    pub auth_dir: Option<PathBuf>,
    /// Node.js executable.
    pub node: PathBuf,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            sidecar_dir: PathBuf::new(),
            port: DEFAULT_SIDECAR_PORT,
            auth_dir: None,
            node: PathBuf::from("node"),
        }
    }
}

fn has_package_json(dir: &Path) -> bool {
    dir.join("package.json").is_file()
}

/// Locate the sidecar directory.
///
/// Order: explicit path, `MURMUR_WHATSAPP_SIDECAR_DIR`, next to the
/// executable, then relative to the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if has_package_json(path) {
            return Ok(path.to_path_buf());
        }
        bail!("no package.json in sidecar directory {}", path.display());
    }

    if let Ok(dir) = std::env::var(SIDECAR_DIR_ENV) {
        let path = PathBuf::from(&dir);
        if has_package_json(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} set but package.json not found");
    }

    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        candidates.push(exe_dir.join("..").join(SIDECAR_REL_DIR));
        candidates.push(exe_dir.join("../..").join(SIDECAR_REL_DIR));
    }
    for prefix in [".", "..", "../.."] {
        candidates.push(Path::new(prefix).join(SIDECAR_REL_DIR));
    }

    for candidate in candidates {
        if has_package_json(&candidate) {
            return Ok(candidate.canonicalize().unwrap_or(candidate));
        }
    }

    bail!("WhatsApp sidecar not found. Set {SIDECAR_DIR_ENV} or create {SIDECAR_REL_DIR}")
}

pub fn is_sidecar_built(sidecar_dir: &Path) -> bool {
    sidecar_dir.join(SIDECAR_ENTRY).exists()
}

/// Spawn the sidecar, installing and building it first if needed.
pub async fn start_sidecar(config: SidecarConfig) -> Result<SidecarProcess> {
    let dir = &config.sidecar_dir;
    if !has_package_json(dir) {
        bail!(
            "WhatsApp sidecar not found at {}. Run `npm install && npm run build` there first.",
            dir.display()
        );
    }

    if !is_sidecar_built(dir) {
        info!(path = %dir.display(), "building WhatsApp sidecar");
        if !dir.join("node_modules").exists() {
            run_npm(dir, &["install"]).await?;
        }
        run_npm(dir, &["run", "build"]).await?;
    }

    info!(path = %dir.display(), port = config.port, "starting WhatsApp sidecar process");

    let mut cmd = Command::new(&config.node);
    cmd.arg(SIDECAR_ENTRY)
        .current_dir(dir)
        .env(SIDECAR_PORT_ENV, config.port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(auth_dir) = &config.auth_dir {
        cmd.env(SIDECAR_AUTH_DIR_ENV, auth_dir);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {}", config.node.display()))?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, true));
    }

    // Catch immediate startup failures (missing deps, port in use).
    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Some(status) = child
        .try_wait()
        .context("failed to check sidecar process status")?
    {
        bail!("sidecar process exited immediately with status: {status}");
    }

    info!(port = config.port, "WhatsApp sidecar process started");
    Ok(SidecarProcess { child, config })
}

/// Forward sidecar output into tracing, dropping transport crypto chatter.
async fn forward_lines(stream: impl AsyncRead + Unpin, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some((level, msg)) = classify_line(&line, is_stderr) {
            if level == tracing::Level::ERROR {
                error!(target: "whatsapp_sidecar", "{msg}");
            } else if level == tracing::Level::WARN {
                warn!(target: "whatsapp_sidecar", "{msg}");
            } else if level == tracing::Level::INFO {
                info!(target: "whatsapp_sidecar", "{msg}");
            } else {
                debug!(target: "whatsapp_sidecar", "{msg}");
            }
        }
    }
}

/// Map one output line to a log level and message. Pino JSON lines keep
/// their level; noise yields `None`.
fn classify_line(line: &str, is_stderr: bool) -> Option<(tracing::Level, String)> {
    if line.trim().is_empty() || is_noise(line) {
        return None;
    }
    if line.starts_with('{')
        && let Ok(log) = serde_json::from_str::<serde_json::Value>(line)
    {
        let msg = log
            .get("msg")
            .and_then(|v| v.as_str())
            .unwrap_or(line)
            .to_string();
        if is_noise(&msg) {
            return None;
        }
        let level = match log.get("level").and_then(|v| v.as_u64()).unwrap_or(30) {
            0..=20 => tracing::Level::DEBUG,
            21..=30 => tracing::Level::INFO,
            31..=40 => tracing::Level::WARN,
            _ => tracing::Level::ERROR,
        };
        return Some((level, msg));
    }
    let level = if is_stderr {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    Some((level, line.to_string()))
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    info!(path = %dir.display(), ?args, "running npm for sidecar");
    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to run npm {}", args.join(" ")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("npm {} failed: {stderr}", args.join(" "));
    }
    Ok(())
}
