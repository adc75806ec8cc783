//! Shared error-context helpers, subprocess execution, and log filtering used
//! across all murmur crates.

pub mod error;
pub mod exec;
pub mod noise;

pub use {
    error::FromMessage,
    exec::{ExecError, ExecOpts, ExecOutput, run},
    noise::{NoiseFilterLayer, is_noise},
};
