//! WhatsApp transport for murmur.
//!
//! WhatsApp Web is spoken by a Node.js Baileys sidecar. This crate starts
//! that process, talks to it over a local WebSocket, supervises the
//! connection lifecycle and exposes the channel traits on top of it.

pub mod error;
pub mod lifecycle;
pub mod outbound;
pub mod process;
pub mod sidecar;
pub mod supervisor;
pub mod types;

pub use {
    error::{Error, Result},
    lifecycle::{
        CloseReason, ConnectionPhase, ConnectionState, Directive, LifecycleEvent, SessionSlot,
        Teardown,
    },
    outbound::WhatsAppOutbound,
    process::{ManagedSidecar, SidecarConfig, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::{DEFAULT_SIDECAR_PORT, SidecarSession, TransportEvent},
    supervisor::{SharedSidecar, SharedSlot, Supervisor, SupervisorConfig, render_qr},
};
