//! HTTP relay between lumen clients and a local Ollama server.
//!
//! The relay forwards model management and chat requests upstream and
//! re-frames the streamed chat output as `{"chunk": ...}` / `{"done": true}`
//! lines.

pub mod config;
pub mod error;
pub mod process;
pub mod server;
pub mod upstream;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use server::{RelayState, router, run, serve};
