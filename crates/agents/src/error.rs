use std::time::Duration;

use murmur_common::ExecError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("backend timed out after {}s", after.as_secs())]
    Timeout { after: Duration },

    #[error("backend exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("failed to start backend: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("backend i/o failed: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<ExecError> for Error {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Timeout { after, .. } => Self::Timeout { after },
            ExecError::Failed { status, stderr, .. } => Self::Failed { status, stderr },
            ExecError::Spawn { source, .. } => Self::Spawn { source },
            ExecError::Io { source, .. } => Self::Io { source },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
