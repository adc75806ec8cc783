//! One WebSocket session with the sidecar.
//!
//! A session owns two tasks: a writer draining an outgoing frame queue into
//! the socket, and a reader that resolves pending requests and forwards
//! everything else to the supervisor tagged with the session's generation.
//! The reader is the session's only event listener; tearing the session
//! down aborts it, so a replaced session can never deliver events again.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    murmur_channels::InboundEvent,
    tokio::{
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    lifecycle::Teardown,
    types::{GatewayMessage, SidecarMessage},
};

pub const DEFAULT_SIDECAR_PORT: u16 = 3100;

/// What a session reports to its supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Qr(String),
    Connected { phone_number: Option<String> },
    Disconnected {
        status_code: Option<u16>,
        reason: Option<String>,
    },
    LoggedOut,
    Message(InboundEvent),
    /// Non-fatal error reported by the sidecar.
    SidecarError(String),
}

/// A [`TransportEvent`] stamped with the generation of the session that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Reply to a correlated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Sent {
        success: bool,
        error: Option<String>,
    },
    Media {
        data_base64: Option<String>,
        error: Option<String>,
    },
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Reply>>>>;

pub struct SidecarSession {
    generation: u64,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    torn_down: AtomicBool,
}

impl SidecarSession {
    /// Open a WebSocket to `url` and start the reader and writer tasks.
    pub async fn connect(
        url: &str,
        generation: u64,
        events: mpsc::UnboundedSender<Tagged>,
    ) -> Result<Self> {
        let (ws, _response) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();
        info!(url, generation, "connected to sidecar");

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!(generation, error = %e, "sidecar write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let pong = outgoing.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SidecarMessage>(text.as_str()) {
                            Ok(msg) => {
                                if let Some(event) = route(msg, &reader_pending).await
                                    && events.send(Tagged { generation, event }).is_err()
                                {
                                    break None;
                                }
                            },
                            Err(e) => warn!(generation, error = %e, "unparseable sidecar frame"),
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = pong.send(Message::Pong(data));
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break Some(frame.map_or_else(
                            || "socket closed".to_string(),
                            |f| format!("socket closed: {}", f.reason.as_str()),
                        ));
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => break Some(format!("socket error: {e}")),
                    None => break Some("socket closed".to_string()),
                }
            };

            // Fail outstanding requests: dropping the senders wakes callers.
            reader_pending.lock().await.clear();
            if let Some(reason) = reason {
                debug!(generation, %reason, "sidecar reader stopped");
                let _ = events.send(Tagged {
                    generation,
                    event: TransportEvent::Disconnected {
                        status_code: None,
                        reason: Some(reason),
                    },
                });
            }
        });

        Ok(Self {
            generation,
            outgoing,
            pending,
            reader,
            writer,
            torn_down: AtomicBool::new(false),
        })
    }

    /// Retry [`connect`](Self::connect) while the sidecar process starts up.
    pub async fn connect_with_retry(
        url: &str,
        generation: u64,
        events: mpsc::UnboundedSender<Tagged>,
        attempts: u32,
        interval: Duration,
    ) -> Result<Self> {
        let mut last = Error::Closed;
        for attempt in 1..=attempts.max(1) {
            match Self::connect(url, generation, events.clone()).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    debug!(attempt, error = %e, "sidecar not reachable yet");
                    last = e;
                },
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Err(last)
    }

    /// Queue a frame without waiting for a reply.
    pub fn send(&self, msg: &GatewayMessage) -> Result<()> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let json = serde_json::to_string(msg)?;
        self.outgoing
            .send(Message::Text(json.into()))
            .map_err(|_| Error::Closed)
    }

    /// Send a frame and wait for the reply carrying its `request_id`.
    pub async fn request(&self, msg: GatewayMessage, timeout: Duration) -> Result<Reply> {
        let id = msg.request_id().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.send(&msg) {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout { after: timeout })
            },
        }
    }
}

#[async_trait]
impl Teardown for SidecarSession {
    fn generation(&self) -> u64 {
        self.generation
    }

    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(generation = self.generation, "tearing down sidecar session");
        self.reader.abort();
        self.pending.lock().await.clear();
        let _ = self.outgoing.send(Message::Close(None));
        // Give the writer a moment to flush the close frame.
        if tokio::time::timeout(Duration::from_secs(1), async {
            while !self.writer.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_err()
        {
            self.writer.abort();
        }
    }
}

impl Drop for SidecarSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Resolve replies against the pending map; everything else becomes an event.
async fn route(msg: SidecarMessage, pending: &PendingMap) -> Option<TransportEvent> {
    let (request_id, reply) = match msg {
        SidecarMessage::Qr { qr } => return Some(TransportEvent::Qr(qr)),
        SidecarMessage::Connected { phone_number } => {
            return Some(TransportEvent::Connected { phone_number });
        },
        SidecarMessage::Disconnected {
            status_code,
            reason,
        } => {
            return Some(TransportEvent::Disconnected {
                status_code,
                reason,
            });
        },
        SidecarMessage::LoggedOut => return Some(TransportEvent::LoggedOut),
        SidecarMessage::Message(wire) => return wire.into_event().map(TransportEvent::Message),
        SidecarMessage::Error { error } => return Some(TransportEvent::SidecarError(error)),
        SidecarMessage::SendResult {
            request_id,
            success,
            error,
        } => (request_id, Reply::Sent { success, error }),
        SidecarMessage::MediaDownloaded {
            request_id,
            data_base64,
            error,
        } => (request_id, Reply::Media { data_base64, error }),
    };

    match pending.lock().await.remove(&request_id) {
        Some(tx) => {
            let _ = tx.send(reply);
        },
        None => debug!(request_id, "reply for unknown request"),
    }
    None
}
