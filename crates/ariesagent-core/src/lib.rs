//! Ariesagent Core - identifiers, protocol states, payloads, errors and configuration

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{AgentConfig, PollPolicy};
pub use error::{Error, Result};
pub use protocol::*;
pub use types::*;
