//! Ariesagent: an Aries invitee agent
//!
//! `AgentFacade` wraps the connection, credential-holder and disclosed-proof
//! machines from `ariesagent-protocol` so that every call runs in its own
//! native session. `Alice` is the scripted participant built on top of it.

pub mod alice;
pub mod demo;
pub mod facade;

pub use alice::Alice;
pub use facade::{AgentFacade, AgentSnapshot};
