//! Owns the sidecar session and drives it through the lifecycle.
//!
//! Every session gets a fresh generation number. Events from any other
//! generation are dropped, so a replaced session cannot trigger a second
//! reconnect or deliver duplicate messages.
//!
//! When the supervisor manages the sidecar process, a dead process is
//! respawned before the next session is opened.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    murmur_channels::InboundEvent,
    qrcode::{QrCode, render::unicode::Dense1x2},
    tokio::sync::{Mutex, mpsc},
    tracing::{debug, info, warn},
};

use crate::{
    lifecycle::{CloseReason, ConnectionState, Directive, LifecycleEvent, SessionSlot},
    process::ManagedSidecar,
    sidecar::{SidecarSession, Tagged, TransportEvent},
    types::GatewayMessage,
};

pub type SharedSlot = Arc<SessionSlot<SidecarSession>>;

/// Sidecar process shared between the supervisor and whoever stops it on exit.
pub type SharedSidecar = Arc<Mutex<dyn ManagedSidecar>>;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Sidecar WebSocket URL, e.g. `ws://127.0.0.1:3100`.
    pub url: String,
    /// Directory holding the WhatsApp credential material.
    pub auth_dir: PathBuf,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Socket connect attempts per session, covering sidecar startup.
    pub connect_attempts: u32,
    pub connect_interval: Duration,
}

impl SupervisorConfig {
    #[must_use]
    pub fn new(port: u16, auth_dir: PathBuf) -> Self {
        Self {
            url: format!("ws://127.0.0.1:{port}"),
            auth_dir,
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 3,
            connect_attempts: 10,
            connect_interval: Duration::from_millis(500),
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    slot: SharedSlot,
    state: ConnectionState,
    generation: u64,
    sidecar: Option<SharedSidecar>,
    inbound: mpsc::Sender<InboundEvent>,
    events_tx: mpsc::UnboundedSender<Tagged>,
    events_rx: mpsc::UnboundedReceiver<Tagged>,
}

impl Supervisor {
    #[must_use]
    pub fn new(config: SupervisorConfig, inbound: mpsc::Sender<InboundEvent>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let state = ConnectionState::new(config.max_reconnect_attempts, config.reconnect_delay);
        Self {
            config,
            slot: Arc::new(SessionSlot::new()),
            state,
            generation: 0,
            sidecar: None,
            inbound,
            events_tx,
            events_rx,
        }
    }

    /// Respawn `sidecar` whenever it has exited before a session is opened.
    #[must_use]
    pub fn with_sidecar(mut self, sidecar: SharedSidecar) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    /// The slot outbound adapters read the live session from.
    #[must_use]
    pub fn slot(&self) -> SharedSlot {
        Arc::clone(&self.slot)
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Run until the inbound consumer goes away.
    pub async fn run(mut self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.config.auth_dir)
            .await
            .with_context(|| format!("creating {}", self.config.auth_dir.display()))?;

        self.start_session().await;
        while let Some(tagged) = self.events_rx.recv().await {
            if !self.handle(tagged).await {
                break;
            }
        }
        self.slot.clear().await;
        info!("whatsapp supervisor stopped");
        Ok(())
    }

    /// Tear down whatever session is live, then open a new one.
    pub async fn start_session(&mut self) {
        self.slot.clear().await;
        self.generation += 1;
        let generation = self.generation;
        self.state.on_event(LifecycleEvent::Connecting);
        self.revive_sidecar().await;

        let connected = SidecarSession::connect_with_retry(
            &self.config.url,
            generation,
            self.events_tx.clone(),
            self.config.connect_attempts,
            self.config.connect_interval,
        )
        .await;

        let (failure, benign) = match connected {
            Ok(session) => {
                let session = Arc::new(session);
                self.slot.replace(Arc::clone(&session)).await;
                let login = GatewayMessage::Login {
                    request_id: uuid::Uuid::new_v4().to_string(),
                    auth_dir: self.config.auth_dir.display().to_string(),
                };
                match session.send(&login) {
                    Ok(()) => {
                        debug!(generation, "login requested");
                        return;
                    },
                    Err(e) => (e.to_string(), e.is_benign()),
                }
            },
            Err(e) => (e.to_string(), e.is_benign()),
        };

        if benign {
            info!(generation, error = %failure, "sidecar connection lost, will reconnect");
        } else {
            warn!(generation, error = %failure, "could not open whatsapp session");
        }
        let _ = self.events_tx.send(Tagged {
            generation,
            event: TransportEvent::Disconnected {
                status_code: None,
                reason: Some(failure),
            },
        });
    }

    /// Restart the managed sidecar if its process has exited. A failed
    /// restart is retried on the next session.
    async fn revive_sidecar(&self) {
        let Some(sidecar) = &self.sidecar else {
            return;
        };
        let mut sidecar = sidecar.lock().await;
        if sidecar.is_running() {
            return;
        }
        warn!(generation = self.generation, "WhatsApp sidecar exited, restarting it");
        match sidecar.restart().await {
            Ok(()) => info!("WhatsApp sidecar restarted"),
            Err(e) => warn!(error = %format!("{e:#}"), "failed to restart WhatsApp sidecar"),
        }
    }

    /// Process one event. Returns `false` once the inbound consumer is gone.
    pub async fn handle(&mut self, tagged: Tagged) -> bool {
        if tagged.generation != self.generation {
            debug!(
                stale = tagged.generation,
                current = self.generation,
                "ignoring event from replaced session"
            );
            return true;
        }

        let lifecycle = match tagged.event {
            TransportEvent::Message(event) => {
                return self.inbound.send(event).await.is_ok();
            },
            TransportEvent::SidecarError(error) => {
                warn!(%error, "sidecar reported an error");
                return true;
            },
            TransportEvent::Qr(payload) => {
                if self.state.on_event(LifecycleEvent::Qr) == Directive::RenderQr {
                    show_qr(&payload);
                }
                return true;
            },
            TransportEvent::Connected { phone_number } => {
                info!(phone = phone_number.as_deref().unwrap_or("unknown"), "WhatsApp connected");
                LifecycleEvent::Open
            },
            TransportEvent::Disconnected {
                status_code,
                reason,
            } => {
                info!(?status_code, reason = reason.as_deref().unwrap_or(""), "WhatsApp disconnected");
                LifecycleEvent::Closed(CloseReason::from_status(status_code))
            },
            TransportEvent::LoggedOut => {
                warn!("WhatsApp session logged out");
                LifecycleEvent::Closed(CloseReason::LoggedOut)
            },
        };

        match self.state.on_event(lifecycle) {
            Directive::Continue | Directive::RenderQr => {},
            Directive::Reconnect { delay } => {
                info!(
                    attempt = self.state.reconnect_attempts(),
                    max = self.config.max_reconnect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reconnecting"
                );
                self.slot.clear().await;
                tokio::time::sleep(delay).await;
                self.start_session().await;
            },
            Directive::ResetSession { delay } => {
                warn!("discarding WhatsApp credentials, a new QR pairing is required");
                self.slot.clear().await;
                if let Err(e) = reset_auth_dir(&self.config.auth_dir).await {
                    warn!(error = %format!("{e:#}"), "could not discard WhatsApp credentials");
                }
                tokio::time::sleep(delay).await;
                self.start_session().await;
            },
        }
        true
    }
}

async fn reset_auth_dir(dir: &std::path::Path) -> anyhow::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {},
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => return Err(e).with_context(|| format!("removing {}", dir.display())),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("recreating {}", dir.display()))
}

/// Render a pairing payload as terminal block art.
#[must_use]
pub fn render_qr(payload: &str) -> Option<String> {
    let code = QrCode::new(payload.as_bytes()).ok()?;
    Some(code.render::<Dense1x2>().quiet_zone(true).build())
}

fn show_qr(payload: &str) {
    match render_qr(payload) {
        Some(art) => {
            info!("scan the QR code below with WhatsApp (Linked devices)");
            eprintln!("\n{art}\n");
        },
        None => warn!(payload, "could not render QR code; pair using the raw payload"),
    }
}
