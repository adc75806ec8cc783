//! From transport event to queued request.
//!
//! Events are handled one at a time in arrival order: gate, normalize,
//! loop guard, commands, then enqueue.

use std::sync::Arc;

use {
    async_trait::async_trait,
    murmur_channels::{AccessGate, Admission, ChannelOutbound, InboundEvent},
    murmur_media::{IngestOutcome, MediaPipeline, NormalizedRequest},
    murmur_sessions::HistoryStore,
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{
    commands::{CLEAR_REPLY, Command, PING_REPLY},
    error::Result,
    queue::QueueHandle,
};

/// Turns an event into a request. Implemented by the media pipeline.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, event: &InboundEvent) -> IngestOutcome;
}

#[async_trait]
impl Normalizer for MediaPipeline {
    async fn normalize(&self, event: &InboundEvent) -> IngestOutcome {
        self.ingest(event).await
    }
}

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Denied(Admission),
    Dropped,
    Rejected,
    LoopEcho,
    Command(Command),
    Enqueued,
}

pub struct InboundRouter {
    gate: AccessGate,
    normalizer: Arc<dyn Normalizer>,
    history: Arc<HistoryStore>,
    outbound: Arc<dyn ChannelOutbound>,
    queue: QueueHandle,
}

impl InboundRouter {
    pub fn new(
        gate: AccessGate,
        normalizer: Arc<dyn Normalizer>,
        history: Arc<HistoryStore>,
        outbound: Arc<dyn ChannelOutbound>,
        queue: QueueHandle,
    ) -> Self {
        Self {
            gate,
            normalizer,
            history,
            outbound,
            queue,
        }
    }

    /// Route events until the transport closes the channel.
    pub async fn run(self, mut events: mpsc::Receiver<InboundEvent>) -> Result<()> {
        while let Some(event) = events.recv().await {
            let outcome = self.route(&event).await?;
            debug!(chat_id = %event.chat_id, ?outcome, "inbound event routed");
        }
        Ok(())
    }

    /// Route one event. Errors only when the queue is gone.
    pub async fn route(&self, event: &InboundEvent) -> Result<Routed> {
        let admission = self.gate.admit(event);
        if admission != Admission::Accepted {
            return Ok(Routed::Denied(admission));
        }

        let request = match self.normalizer.normalize(event).await {
            IngestOutcome::Ready(request) => request,
            IngestOutcome::Dropped => return Ok(Routed::Dropped),
            IngestOutcome::Rejected { notice } => {
                self.reply(&event.chat_id, notice).await;
                return Ok(Routed::Rejected);
            },
        };

        if request.prompt_text.is_empty() {
            return Ok(Routed::Dropped);
        }
        if AccessGate::is_loop_echo(request.from_self, &request.prompt_text) {
            debug!(chat_id = %request.chat_id, "skipping own failure notice");
            return Ok(Routed::LoopEcho);
        }
        if let Some(command) = Command::parse(&request.prompt_text) {
            self.run_command(command, request).await;
            return Ok(Routed::Command(command));
        }

        info!(chat_id = %request.chat_id, kind = ?event.kind, "queued");
        self.queue.enqueue(request)?;
        Ok(Routed::Enqueued)
    }

    async fn run_command(&self, command: Command, request: NormalizedRequest) {
        let chat_id = request.chat_id.as_str();
        let reply = match command {
            Command::Ping => PING_REPLY,
            Command::Clear => {
                if let Err(e) = self.history.clear(chat_id).await {
                    warn!(chat_id, error = %e, "failed to clear history");
                    return;
                }
                info!(chat_id, "history cleared");
                CLEAR_REPLY
            },
        };
        self.reply(chat_id, reply).await;
    }

    async fn reply(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.outbound.send_text(chat_id, text).await {
            warn!(chat_id, error = %e, "failed to reply");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            error::{GENERIC_FAILURE_NOTICE, TIMEOUT_NOTICE},
            testing::{RecordingOutbound, outbound},
        },
        murmur_channels::MessageKind,
        murmur_media::TRANSCRIPTION_FAILED_NOTICE,
        murmur_sessions::HistoryEntry,
        std::sync::Mutex,
    };

    const OWNER: &str = "5511@s.whatsapp.net";

    /// Text passes through; audio is rejected; images yield nothing.
    struct FakeNormalizer;

    #[async_trait]
    impl Normalizer for FakeNormalizer {
        async fn normalize(&self, event: &InboundEvent) -> IngestOutcome {
            match event.kind {
                MessageKind::Text => match event.body() {
                    Some(text) => IngestOutcome::Ready(NormalizedRequest::text(event, text)),
                    None => IngestOutcome::Dropped,
                },
                MessageKind::Audio => IngestOutcome::Rejected {
                    notice: TRANSCRIPTION_FAILED_NOTICE,
                },
                _ => IngestOutcome::Dropped,
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        router: InboundRouter,
        outbound: Arc<RecordingOutbound>,
        history: Arc<HistoryStore>,
        queued: Arc<Mutex<Vec<NormalizedRequest>>>,
    }

    fn fixture(self_chat: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::new(dir.path().to_path_buf(), 20));
        let outbound = outbound();
        let (queue, mut rx) = test_queue();
        let queued = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&queued);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                sink.lock().unwrap().push(request);
            }
        });
        let router = InboundRouter::new(
            AccessGate::new([OWNER], self_chat),
            Arc::new(FakeNormalizer),
            Arc::clone(&history),
            outbound.clone(),
            queue,
        );
        Fixture {
            _dir: dir,
            router,
            outbound,
            history,
            queued,
        }
    }

    fn test_queue() -> (QueueHandle, mpsc::UnboundedReceiver<NormalizedRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (QueueHandle::from_sender(tx), rx)
    }

    fn event(chat_id: &str, from_self: bool, kind: MessageKind, text: Option<&str>) -> InboundEvent {
        InboundEvent {
            message_id: "m".into(),
            chat_id: chat_id.into(),
            sender_id: chat_id.into(),
            from_self,
            kind,
            text: text.map(Into::into),
            caption: None,
        }
    }

    #[tokio::test]
    async fn test_text_is_enqueued() {
        let fx = fixture(true);
        let routed = fx
            .router
            .route(&event(OWNER, false, MessageKind::Text, Some("hello")))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Enqueued);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let queued = fx.queued.lock().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].prompt_text, "hello");
    }

    #[tokio::test]
    async fn test_gate() {
        let fx = fixture(false);
        let stranger = event("999@s.whatsapp.net", false, MessageKind::Text, Some("hi"));
        assert_eq!(
            fx.router.route(&stranger).await.unwrap(),
            Routed::Denied(Admission::NotAllowlisted)
        );
        let own = event(OWNER, true, MessageKind::Text, Some("hi"));
        assert_eq!(
            fx.router.route(&own).await.unwrap(),
            Routed::Denied(Admission::SelfChatDisabled)
        );
        assert!(fx.outbound.sent().is_empty());
    }

    #[tokio::test]
    async fn test_loop_guard_only_applies_to_self() {
        let fx = fixture(true);
        for notice in [
            GENERIC_FAILURE_NOTICE,
            TIMEOUT_NOTICE,
            TRANSCRIPTION_FAILED_NOTICE,
        ] {
            let echo = event(OWNER, true, MessageKind::Text, Some(notice));
            assert_eq!(fx.router.route(&echo).await.unwrap(), Routed::LoopEcho);
        }

        let partner = event(OWNER, false, MessageKind::Text, Some(GENERIC_FAILURE_NOTICE));
        assert_eq!(fx.router.route(&partner).await.unwrap(), Routed::Enqueued);
    }

    #[tokio::test]
    async fn test_commands_bypass_queue() {
        let fx = fixture(true);
        fx.history
            .append(OWNER, HistoryEntry::now("q", "a", false))
            .await
            .unwrap();

        let ping = event(OWNER, false, MessageKind::Text, Some("/PING"));
        assert_eq!(
            fx.router.route(&ping).await.unwrap(),
            Routed::Command(Command::Ping)
        );
        let clear = event(OWNER, false, MessageKind::Text, Some("/clear"));
        assert_eq!(
            fx.router.route(&clear).await.unwrap(),
            Routed::Command(Command::Clear)
        );

        assert_eq!(fx.outbound.texts(), vec![
            PING_REPLY.to_string(),
            CLEAR_REPLY.to_string()
        ]);
        assert!(fx.history.load(OWNER).await.is_empty());
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(fx.queued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_voice_notifies_chat() {
        let fx = fixture(true);
        let voice = event(OWNER, false, MessageKind::Audio, None);
        assert_eq!(fx.router.route(&voice).await.unwrap(), Routed::Rejected);
        assert_eq!(fx.outbound.texts(), vec![TRANSCRIPTION_FAILED_NOTICE.to_string()]);

        let empty = event(OWNER, false, MessageKind::Text, None);
        assert_eq!(fx.router.route(&empty).await.unwrap(), Routed::Dropped);
    }
}
