//! Ariesagent VCX - the credential/DIDComm library boundary
//!
//! `VcxLibrary` is the narrow interface the protocol machines call through.
//! `InMemoryVcx` is a deterministic in-process implementation that simulates
//! the remote inviter, issuer and verifier.

pub mod library;
pub mod memory;
pub mod tails;

pub use library::VcxLibrary;
pub use memory::{ContextStats, InMemoryVcx, OutboundMessage};
pub use tails::{tails_file_name, AlwaysFail, CacheBacked, RemoteFetch, TailsResolver};
