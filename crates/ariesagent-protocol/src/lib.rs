//! Ariesagent Protocol - session-scoped protocol state machines
//!
//! Connection, credential-holder and disclosed-proof machines keyed by
//! caller-assigned ids. None of them manage the native session; callers wrap
//! every operation in a `SessionContext` scope.

pub mod connection;
pub mod holder;
pub mod prover;
pub mod session;

pub use connection::{ConnectionRecord, ConnectionService};
pub use holder::{HolderRecord, HolderService};
pub use prover::{ProofRecord, ProverService};
pub use session::SessionContext;
