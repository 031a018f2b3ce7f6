//! qdrop-core: Shared library for the qdrop protocol and transfer engine.
//!
//! This crate provides:
//! - Protocol message definitions and wire format codec
//! - The chunked transfer engine (framing, pacing, reassembly)
//! - Progress telemetry sampling
//! - Error types, logging, and constants

pub mod constants;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod transfer;

pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat};
