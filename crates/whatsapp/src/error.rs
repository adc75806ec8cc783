use std::time::Duration;

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sidecar websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("sidecar protocol error: {message}")]
    Protocol { message: String },

    /// The session was torn down or the socket closed before a reply.
    #[error("Connection Closed")]
    Closed,

    #[error("sidecar did not answer within {}s", after.as_secs())]
    Timeout { after: Duration },

    #[error("not connected to WhatsApp")]
    NotConnected,
}

impl Error {
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Transport faults the supervisor recovers from by reconnecting.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Closed | Self::Protocol { .. } | Self::WebSocket(_))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<Error> for murmur_channels::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::NotConnected | Error::Closed => Self::unavailable(err),
            other => Self::external("whatsapp sidecar", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
