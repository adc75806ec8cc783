use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::PathBuf,
};

use {
    fd_lock::RwLock,
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
    tracing::warn,
};

use crate::error::{Context, Result};

/// One completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Normalized request text sent to the backend.
    #[serde(rename = "text")]
    pub user_text: String,
    /// Raw backend reply.
    #[serde(rename = "reply", default)]
    pub assistant_reply: String,
    #[serde(rename = "fromMe", default)]
    pub from_self: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl HistoryEntry {
    #[must_use]
    pub fn now(
        user_text: impl Into<String>,
        assistant_reply: impl Into<String>,
        from_self: bool,
    ) -> Self {
        Self {
            user_text: user_text.into(),
            assistant_reply: assistant_reply.into(),
            from_self,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Ordered entries for one chat, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryLog(Vec<HistoryEntry>);

impl HistoryLog {
    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append `entry`, then drop the oldest entries beyond `cap`.
    pub fn push_capped(&mut self, entry: HistoryEntry, cap: usize) {
        self.0.push(entry);
        self.truncate_to_last(cap);
    }

    /// Keep only the newest `cap` entries.
    pub fn truncate_to_last(&mut self, cap: usize) {
        let excess = self.0.len().saturating_sub(cap);
        if excess > 0 {
            self.0.drain(..excess);
        }
    }
}

impl From<Vec<HistoryEntry>> for HistoryLog {
    fn from(entries: Vec<HistoryEntry>) -> Self {
        Self(entries)
    }
}

/// File-backed history keyed by chat identifier.
pub struct HistoryStore {
    base_dir: PathBuf,
    max_entries: usize,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(base_dir: PathBuf, max_entries: usize) -> Self {
        Self {
            base_dir,
            max_entries,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Sanitize a chat identifier for use as a filename.
    ///
    /// Anything outside `[A-Za-z0-9@._-]` becomes `_`, so distinct ids that
    /// differ only in such characters share a file.
    #[must_use]
    pub fn chat_to_filename(chat_id: &str) -> String {
        let stem: String = chat_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{stem}.json")
    }

    fn path_for(&self, chat_id: &str) -> PathBuf {
        self.base_dir.join(Self::chat_to_filename(chat_id))
    }

    /// Load a chat's history. Missing or unreadable files yield an empty log.
    pub async fn load(&self, chat_id: &str) -> HistoryLog {
        let path = self.path_for(chat_id);
        let path_display = path.display().to_string();

        let result = tokio::task::spawn_blocking(move || -> Result<HistoryLog> {
            if !path.exists() {
                return Ok(HistoryLog::default());
            }
            let file = File::open(&path)?;
            let lock = RwLock::new(file);
            let guard = lock.read().context("locking history for read")?;
            let mut raw = String::new();
            (&*guard).read_to_string(&mut raw)?;
            if raw.trim().is_empty() {
                return Ok(HistoryLog::default());
            }
            Ok(serde_json::from_str(&raw)?)
        })
        .await;

        match result {
            Ok(Ok(log)) => log,
            Ok(Err(e)) => {
                warn!(path = %path_display, error = %e, "unreadable history, starting empty");
                HistoryLog::default()
            },
            Err(e) => {
                warn!(path = %path_display, error = %e, "history load task failed");
                HistoryLog::default()
            },
        }
    }

    /// Persist `log`, keeping only the newest `max_entries` entries.
    pub async fn save(&self, chat_id: &str, log: &HistoryLog) -> Result<()> {
        let mut log = log.clone();
        log.truncate_to_last(self.max_entries);
        self.write(chat_id, log).await
    }

    /// Append one entry to a chat's history.
    pub async fn append(&self, chat_id: &str, entry: HistoryEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut log = self.load(chat_id).await;
        log.push_capped(entry, self.max_entries);
        self.write(chat_id, log).await
    }

    /// Reset a chat's history to empty.
    pub async fn clear(&self, chat_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(chat_id, HistoryLog::default()).await
    }

    async fn write(&self, chat_id: &str, log: HistoryLog) -> Result<()> {
        let path = self.path_for(chat_id);
        let json = serde_json::to_string_pretty(&log)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            let mut lock = RwLock::new(file);
            let mut guard = lock.write().context("locking history for write")?;
            guard.set_len(0)?;
            guard.write_all(json.as_bytes())?;
            guard.flush()?;
            Ok(())
        })
        .await??;

        Ok(())
    }
}
