//! The global request queue and its single dispatcher.
//!
//! Requests from every chat go through one channel drained by one task, so
//! the backend is never invoked twice at once and replies leave in arrival
//! order.

use std::sync::Arc;

use {
    murmur_agents::AgentBackend,
    murmur_channels::{ChannelOutbound, Presence},
    murmur_media::NormalizedRequest,
    murmur_sessions::{HistoryEntry, HistoryStore},
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{Error, Result},
    reply::Responder,
};

/// Cheap handle for appending to the queue.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<NormalizedRequest>,
}

impl QueueHandle {
    pub fn enqueue(&self, request: NormalizedRequest) -> Result<()> {
        self.tx.send(request).map_err(|_| Error::QueueClosed)
    }

    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::UnboundedSender<NormalizedRequest>) -> Self {
        Self { tx }
    }
}

pub struct Dispatcher {
    backend: Arc<dyn AgentBackend>,
    history: Arc<HistoryStore>,
    outbound: Arc<dyn ChannelOutbound>,
    responder: Responder,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        history: Arc<HistoryStore>,
        outbound: Arc<dyn ChannelOutbound>,
        responder: Responder,
    ) -> Self {
        Self {
            backend,
            history,
            outbound,
            responder,
        }
    }

    /// Start the dispatcher task. It exits once every handle is dropped and
    /// the queue has drained.
    pub fn spawn(self) -> (QueueHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (QueueHandle { tx }, task)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<NormalizedRequest>) {
        while let Some(request) = rx.recv().await {
            self.dispatch(request).await;
        }
        debug!("request queue closed");
    }

    /// Fully process one request. Failures are reported to the chat and
    /// never escape.
    pub async fn dispatch(&self, mut request: NormalizedRequest) {
        let cleanup = std::mem::take(&mut request.cleanup);
        let chat_id = request.chat_id.as_str();

        match self.answer(&request).await {
            Ok(reply) => {
                cleanup.discharge().await;
                let entry = HistoryEntry::now(&request.prompt_text, &reply, request.from_self);
                if let Err(e) = self.history.append(chat_id, entry).await {
                    warn!(chat_id, error = %e, "failed to save history");
                }
                info!(chat_id, chars = reply.chars().count(), "response sent");
            },
            Err(e) => {
                cleanup.discharge().await;
                error!(chat_id, error = %e, "request failed");
                self.presence(chat_id, Presence::Paused).await;
                if let Err(e) = self.outbound.send_text(chat_id, e.user_notice()).await {
                    warn!(chat_id, error = %e, "failed to send failure notice");
                }
            },
        }
    }

    async fn answer(&self, request: &NormalizedRequest) -> Result<String> {
        let chat_id = request.chat_id.as_str();
        self.presence(chat_id, Presence::Composing).await;
        info!(
            chat_id,
            prompt = %request.prompt_text.chars().take(80).collect::<String>(),
            "processing"
        );

        let history = self.history.load(chat_id).await;
        let reply = self
            .backend
            .respond(&request.prompt_text, history.entries())
            .await?;

        self.presence(chat_id, Presence::Paused).await;
        self.responder
            .deliver(chat_id, &reply, request.was_voice)
            .await?;
        Ok(reply)
    }

    /// Typing indicator; failures are only logged.
    async fn presence(&self, chat_id: &str, presence: Presence) {
        if let Err(e) = self.outbound.send_presence(chat_id, presence).await {
            debug!(chat_id, ?presence, error = %e, "presence update failed");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use {
        super::*,
        crate::{
            error::{GENERIC_FAILURE_NOTICE, TIMEOUT_NOTICE},
            reply::EgressGate,
            testing::{FakeBackend, RecordingOutbound, Sent, outbound},
        },
        murmur_config::VoiceReplyMode,
        murmur_media::CleanupObligations,
    };

    struct Fixture {
        dir: tempfile::TempDir,
        history: Arc<HistoryStore>,
        outbound: Arc<RecordingOutbound>,
        backend: Arc<FakeBackend>,
    }

    impl Fixture {
        fn new(backend: FakeBackend) -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                history: Arc::new(HistoryStore::new(dir.path().join("history"), 20)),
                dir,
                outbound: outbound(),
                backend: Arc::new(backend),
            }
        }

        fn dispatcher(&self) -> Dispatcher {
            let responder = Responder::new(
                self.outbound.clone(),
                None,
                VoiceReplyMode::Never,
                EgressGate::new([self.dir.path()]),
            );
            Dispatcher::new(
                self.backend.clone(),
                Arc::clone(&self.history),
                self.outbound.clone(),
                responder,
            )
        }
    }

    fn request(chat_id: &str, text: &str) -> NormalizedRequest {
        NormalizedRequest {
            chat_id: chat_id.into(),
            prompt_text: text.into(),
            from_self: false,
            was_voice: false,
            cleanup: CleanupObligations::new(),
        }
    }

    #[tokio::test]
    async fn test_successful_turn() {
        let fx = Fixture::new(FakeBackend::default());
        fx.dispatcher().dispatch(request("a@s.whatsapp.net", "hi")).await;

        assert_eq!(fx.outbound.sent(), vec![
            Sent::Presence {
                to: "a@s.whatsapp.net".into(),
                presence: Presence::Composing
            },
            Sent::Presence {
                to: "a@s.whatsapp.net".into(),
                presence: Presence::Paused
            },
            Sent::Text {
                to: "a@s.whatsapp.net".into(),
                text: "reply:hi".into()
            },
        ]);

        let log = fx.history.load("a@s.whatsapp.net").await;
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].user_text, "hi");
        assert_eq!(log.entries()[0].assistant_reply, "reply:hi");
    }

    #[tokio::test]
    async fn test_history_is_passed_to_backend() {
        let fx = Fixture::new(FakeBackend::default());
        let dispatcher = fx.dispatcher();
        dispatcher.dispatch(request("a", "one")).await;
        dispatcher.dispatch(request("a", "two")).await;
        dispatcher.dispatch(request("b", "three")).await;

        assert_eq!(fx.backend.calls(), vec![
            ("one".to_string(), 0),
            ("two".to_string(), 1),
            ("three".to_string(), 0),
        ]);
    }

    #[tokio::test]
    async fn test_timeout_and_generic_failures() {
        let fx = Fixture::new(FakeBackend::default());
        fx.backend.script(Err(murmur_agents::Error::Timeout {
            after: Duration::from_secs(300),
        }));
        fx.backend.script(Err(murmur_agents::Error::Failed {
            status: "exit status: 1".into(),
            stderr: "secret internals".into(),
        }));

        let dispatcher = fx.dispatcher();
        dispatcher.dispatch(request("a", "slow")).await;
        dispatcher.dispatch(request("a", "broken")).await;
        dispatcher.dispatch(request("a", "fine")).await;

        assert_eq!(fx.outbound.texts(), vec![
            TIMEOUT_NOTICE.to_string(),
            GENERIC_FAILURE_NOTICE.to_string(),
            "reply:fine".to_string(),
        ]);
        // Failed turns are not recorded.
        assert_eq!(fx.history.load("a").await.len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_is_contained() {
        let mut recording = RecordingOutbound::default();
        recording.fail_on = Some("reply:boom".into());
        let mut fx = Fixture::new(FakeBackend::default());
        fx.outbound = Arc::new(recording);

        let dispatcher = fx.dispatcher();
        dispatcher.dispatch(request("a", "boom")).await;
        dispatcher.dispatch(request("a", "ok")).await;

        assert_eq!(fx.outbound.texts(), vec![
            GENERIC_FAILURE_NOTICE.to_string(),
            "reply:ok".to_string()
        ]);
    }

    #[tokio::test]
    async fn test_cleanup_discharged_on_success_and_failure() {
        let fx = Fixture::new(FakeBackend::default());
        fx.backend.script(Err(murmur_agents::Error::message("exploded")));
        let scratch = tempfile::tempdir().unwrap();

        let with_file = |name: &str| {
            let path = scratch.path().join(name);
            std::fs::write(&path, b"jpg").unwrap();
            let mut req = request("a", name);
            req.cleanup.register(&path);
            (req, path)
        };

        let dispatcher = fx.dispatcher();
        let (failing, failing_path) = with_file("img_1.jpg");
        dispatcher.dispatch(failing).await;
        let (ok, ok_path) = with_file("img_2.jpg");
        dispatcher.dispatch(ok).await;

        assert!(!failing_path.exists());
        assert!(!ok_path.exists());
    }

    #[tokio::test]
    async fn test_one_backend_call_at_a_time_in_arrival_order() {
        let fx = Fixture::new(FakeBackend::with_delay(Duration::from_millis(20)));
        let (queue, task) = fx.dispatcher().spawn();

        let producers: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|chat| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..3 {
                        queue.enqueue(request(chat, &format!("{chat}{i}"))).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.await.unwrap();
        }
        drop(queue);
        task.await.unwrap();

        assert_eq!(fx.backend.max_in_flight.load(Ordering::SeqCst), 1);
        let asked: Vec<String> = fx.backend.calls().into_iter().map(|(m, _)| m).collect();
        let replied: Vec<String> = fx
            .outbound
            .texts()
            .into_iter()
            .map(|t| t.trim_start_matches("reply:").to_string())
            .collect();
        assert_eq!(asked.len(), 9);
        assert_eq!(asked, replied);
        for chat in ["a", "b", "c"] {
            let own: Vec<&String> = asked.iter().filter(|m| m.starts_with(chat)).collect();
            assert_eq!(own, [&format!("{chat}0"), &format!("{chat}1"), &format!("{chat}2")]);
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown() {
        let fx = Fixture::new(FakeBackend::default());
        let (queue, task) = fx.dispatcher().spawn();
        task.abort();
        let _ = task.await;
        assert!(matches!(
            queue.enqueue(request("a", "late")),
            Err(Error::QueueClosed)
        ));
    }
}
