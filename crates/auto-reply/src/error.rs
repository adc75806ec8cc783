use thiserror::Error;

/// Sent when a request fails for any reason other than a timeout.
pub const GENERIC_FAILURE_NOTICE: &str = "Error processing your message. Please try again.";

pub const TIMEOUT_NOTICE: &str = "Response timed out. Try a shorter or more specific message.";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Agent(#[from] murmur_agents::Error),

    #[error(transparent)]
    Channel(#[from] murmur_channels::Error),

    #[error(transparent)]
    History(#[from] murmur_sessions::Error),

    #[error("request queue closed")]
    QueueClosed,
}

impl Error {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Agent(e) if e.is_timeout())
    }

    /// The plain-text message the chat sees. Internal detail never leaks.
    #[must_use]
    pub fn user_notice(&self) -> &'static str {
        if self.is_timeout() {
            TIMEOUT_NOTICE
        } else {
            GENERIC_FAILURE_NOTICE
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
