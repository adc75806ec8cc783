//! Suppression of cryptographic-session chatter.
//!
//! The messaging transport logs key material and per-message decryption
//! details at a volume that drowns out everything else. [`NoiseFilterLayer`]
//! drops any tracing event whose message or fields contain one of
//! [`NOISE_PATTERNS`]; the same predicate is applied to raw sidecar output
//! lines via [`is_noise`]. Nothing else is affected.

use std::fmt::Write as _;

use {
    tracing::{
        Event, Subscriber,
        field::{Field, Visit},
    },
    tracing_subscriber::{Layer, layer::Context},
};

/// Substrings identifying noisy transport diagnostics.
pub const NOISE_PATTERNS: &[&str] = &[
    "Closing session",
    "SessionEntry",
    "Decrypted message",
    "Bad MAC",
    "Failed to decrypt",
    "Session error",
    "Closing open session",
    "pendingPreKey",
    "registrationId",
    "ephemeralKeyPair",
    "_chains",
    "chainKey",
    "rootKey",
    "baseKey",
    "indexInfo",
    "currentRatchet",
];

/// Returns `true` if `line` matches the noise denylist.
#[must_use]
pub fn is_noise(line: &str) -> bool {
    NOISE_PATTERNS.iter().any(|p| line.contains(p))
}

/// Layer that vetoes noisy events before any sink sees them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseFilterLayer;

impl<S: Subscriber> Layer<S> for NoiseFilterLayer {
    fn event_enabled(&self, event: &Event<'_>, _ctx: Context<'_, S>) -> bool {
        let mut visitor = TextVisitor::default();
        event.record(&mut visitor);
        !is_noise(&visitor.0)
    }
}

/// Flattens an event's message and fields into one searchable string.
#[derive(Default)]
struct TextVisitor(String);

impl Visit for TextVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        let _ = write!(self.0, " {}={value}", field.name());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let _ = write!(self.0, " {}={value:?}", field.name());
    }
}
