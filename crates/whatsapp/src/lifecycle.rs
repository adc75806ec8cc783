//! Connection lifecycle: a pure state machine plus the slot that owns the
//! live transport session.
//!
//! [`ConnectionState::on_event`] never performs I/O. It updates the phase
//! and reconnect counter and returns a [`Directive`] that the supervisor
//! carries out.

use std::{sync::Arc, time::Duration};

use {async_trait::async_trait, tokio::sync::RwLock, tracing::debug};

/// Baileys' status code for an invalidated credential session.
pub const LOGGED_OUT_STATUS: u16 = 401;

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Open,
    AuthExpired,
}

/// Why the transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit logout from the phone.
    LoggedOut,
    Status(u16),
    /// No status code (socket dropped, sidecar unreachable).
    Unknown,
}

impl CloseReason {
    #[must_use]
    pub fn from_status(status: Option<u16>) -> Self {
        status.map_or(Self::Unknown, Self::Status)
    }

    /// Terminal closes mean the stored credentials are no longer valid.
    /// Everything not known to be terminal is retried.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::LoggedOut | Self::Status(LOGGED_OUT_STATUS))
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A new session is being established.
    Connecting,
    /// A pairing QR payload arrived.
    Qr,
    Open,
    Closed(CloseReason),
}

/// What the supervisor must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    RenderQr,
    /// Reconnect after `delay`, keeping session material.
    Reconnect { delay: Duration },
    /// Discard session material, then start a fresh unauthenticated session
    /// after `delay`.
    ResetSession { delay: Duration },
}

#[derive(Debug, Clone)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    reconnect_attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY)
    }
}

impl ConnectionState {
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            reconnect_attempts: 0,
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn on_event(&mut self, event: LifecycleEvent) -> Directive {
        let directive = match event {
            LifecycleEvent::Connecting => {
                self.phase = ConnectionPhase::Connecting;
                Directive::Continue
            },
            LifecycleEvent::Qr => {
                self.reconnect_attempts = 0;
                Directive::RenderQr
            },
            LifecycleEvent::Open => {
                self.phase = ConnectionPhase::Open;
                self.reconnect_attempts = 0;
                Directive::Continue
            },
            LifecycleEvent::Closed(reason) if reason.is_terminal() => {
                self.phase = ConnectionPhase::AuthExpired;
                self.reconnect_attempts = 0;
                Directive::ResetSession {
                    delay: Duration::ZERO,
                }
            },
            LifecycleEvent::Closed(_) => {
                self.reconnect_attempts += 1;
                if self.reconnect_attempts >= self.max_attempts {
                    self.phase = ConnectionPhase::AuthExpired;
                    self.reconnect_attempts = 0;
                    Directive::ResetSession { delay: self.delay }
                } else {
                    self.phase = ConnectionPhase::Disconnected;
                    Directive::Reconnect { delay: self.delay }
                }
            },
        };
        debug!(?event, phase = ?self.phase, attempts = self.reconnect_attempts, ?directive, "lifecycle");
        directive
    }
}

/// A transport session that can be shut down in place.
#[async_trait]
pub trait Teardown: Send + Sync {
    fn generation(&self) -> u64;

    /// Detach every event listener and close the connection. Idempotent.
    async fn teardown(&self);
}

/// Holds at most one live session.
pub struct SessionSlot<S> {
    current: RwLock<Option<Arc<S>>>,
}

impl<S> Default for SessionSlot<S> {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }
}

impl<S: Teardown> SessionSlot<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tear down the current session, then install `next`. Holds the write
    /// lock throughout, so no reader ever sees two sessions alive.
    pub async fn replace(&self, next: Arc<S>) {
        let mut current = self.current.write().await;
        if let Some(old) = current.take() {
            old.teardown().await;
        }
        *current = Some(next);
    }

    /// Tear down and remove the current session.
    pub async fn clear(&self) {
        let mut current = self.current.write().await;
        if let Some(old) = current.take() {
            old.teardown().await;
        }
    }

    pub async fn current(&self) -> Option<Arc<S>> {
        self.current.read().await.clone()
    }

    /// Generation of the live session, if any.
    pub async fn generation(&self) -> Option<u64> {
        self.current.read().await.as_ref().map(|s| s.generation())
    }
}
