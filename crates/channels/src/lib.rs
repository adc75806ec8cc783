//! Channel-neutral message types, the outbound adapter trait, and the
//! inbound access gate.
//!
//! The transport crate produces [`InboundEvent`]s and implements
//! [`ChannelOutbound`] / [`MediaSource`]; everything downstream only sees
//! these types.

pub mod error;
pub mod gating;
pub mod plugin;

pub use {
    error::{Error, Result},
    gating::{AccessGate, Admission, normalize_sender},
    plugin::{
        ChannelOutbound, InboundEvent, MediaSource, MessageKind, OutboundDocument, Presence,
    },
};
