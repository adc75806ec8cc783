//! Inbound message processing: the glue between the transport and the
//! assistant.
//!
//! Flow: transport event → access gate → media normalization → loop guard →
//! commands → request queue → backend → post-processing → delivery.

pub mod chunk;
pub mod commands;
pub mod error;
pub mod inbound;
pub mod queue;
pub mod reply;

#[cfg(test)]
mod testing;

pub use {
    chunk::{MAX_CHUNK_CHARS, split_message},
    commands::Command,
    error::{Error, GENERIC_FAILURE_NOTICE, Result, TIMEOUT_NOTICE},
    inbound::{InboundRouter, Normalizer, Routed},
    queue::{Dispatcher, QueueHandle},
    reply::{Egress, EgressGate, ParsedReply, Responder, parse_reply, should_reply_with_voice},
};
