//! Shared types for the encoder caption daemon: device wire constants, the
//! frame decoder, the caption window, configuration and the local client
//! protocol.

pub mod config;
pub mod encoder;
pub mod error;
pub mod framing;
pub mod platform;
pub mod protocol;
pub mod session;
pub mod state;
pub mod window;
