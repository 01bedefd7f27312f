//! Core types for Ariesagent: record identifiers, library handles and protocol states

use crate::error::{Error, Result};
use crate::protocol::ConnectionMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(Arc::from(s.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

record_id!(
    /// Caller-assigned connection identifier, stable for the lifetime of the relationship.
    ConnectionId
);
record_id!(
    /// Caller-assigned holder credential identifier.
    CredentialId
);
record_id!(
    /// Caller-assigned disclosed proof identifier.
    ProofId
);

macro_rules! library_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

library_handle!(
    /// Opaque handle the collaborator library assigns to a connection object.
    ConnectionHandle
);
library_handle!(
    /// Opaque handle to a holder-side credential object.
    CredentialHandle
);
library_handle!(
    /// Opaque handle to a disclosed proof object.
    ProofHandle
);

// ---------------------------------------------------------------------------
// Connection protocol
// ---------------------------------------------------------------------------

/// Connection protocol state. Ordered: a record only ever moves to a greater state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Initial,
    Invited,
    Requested,
    Responded,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// An out-of-band invitation was parsed into a connection object.
    InvitationAccepted,
    /// The connection request went out to the inviter.
    RequestSent,
    /// A protocol message arrived from the inviter.
    Inbound(ConnectionMessage),
}

impl ConnectionEvent {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::InvitationAccepted => "accept invitation",
            Self::RequestSent => "send connection request",
            Self::Inbound(ConnectionMessage::Response) => "apply connection response",
            Self::Inbound(ConnectionMessage::Ack) => "apply connection ack",
            Self::Inbound(ConnectionMessage::ProblemReport(_)) => "apply problem report",
        }
    }
}

impl ConnectionState {
    /// Exhaustive transition table. Re-delivery of an already applied message
    /// keeps the state; everything else that does not move forward is rejected.
    pub fn transition(self, event: &ConnectionEvent) -> Result<Self> {
        use ConnectionEvent::*;
        use ConnectionMessage::*;
        match (self, event) {
            (Self::Initial, InvitationAccepted) => Ok(Self::Invited),
            (Self::Invited, RequestSent) => Ok(Self::Requested),
            (Self::Requested, Inbound(Response)) => Ok(Self::Responded),
            (Self::Responded, Inbound(Response)) => Ok(Self::Responded),
            (Self::Responded, Inbound(Ack)) => Ok(Self::Completed),
            (Self::Completed, Inbound(Response | Ack)) => Ok(Self::Completed),
            (state @ (Self::Initial | Self::Invited | Self::Requested), Inbound(Ack)) => {
                Err(Error::protocol(format!(
                    "peer acknowledged connection in state {} before responding",
                    state
                )))
            }
            (state, Inbound(ProblemReport(reason))) => Err(Error::protocol(format!(
                "peer reported a problem on connection in state {}: {}",
                state, reason
            ))),
            (state, event) => Err(Error::invalid_state("connection", state, event.describe())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Invited => "Invited",
            Self::Requested => "Requested",
            Self::Responded => "Responded",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Credential holder protocol
// ---------------------------------------------------------------------------

/// Holder-side credential state. `Initial` is reported for ids with no record yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolderState {
    Initial,
    OfferReceived,
    RequestSent,
    CredentialReceived,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HolderEvent {
    OfferReceived,
    RequestSent,
    CredentialIssued,
    /// Issuer rejected the exchange, or revocation metadata could not be resolved.
    Failed,
}

impl HolderEvent {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::OfferReceived => "receive offer",
            Self::RequestSent => "send credential request",
            Self::CredentialIssued => "store issued credential",
            Self::Failed => "fail",
        }
    }
}

impl HolderState {
    pub fn transition(self, event: HolderEvent) -> Result<Self> {
        match (self, event) {
            (Self::Initial, HolderEvent::OfferReceived) => Ok(Self::OfferReceived),
            (Self::OfferReceived, HolderEvent::RequestSent) => Ok(Self::RequestSent),
            (Self::RequestSent, HolderEvent::CredentialIssued) => Ok(Self::CredentialReceived),
            (Self::CredentialReceived, HolderEvent::CredentialIssued) => Ok(Self::CredentialReceived),
            (Self::OfferReceived | Self::RequestSent, HolderEvent::Failed) => Ok(Self::Failed),
            (state, event) => Err(Error::invalid_state("credential", state, event.describe())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CredentialReceived | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::OfferReceived => "OfferReceived",
            Self::RequestSent => "RequestSent",
            Self::CredentialReceived => "CredentialReceived",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for HolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Disclosed proof (prover) protocol
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProverState {
    RequestReceived,
    CredentialsSelected,
    ProofGenerated,
    PresentationSent,
    PresentationAckReceived,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProverEvent {
    CredentialsSelected,
    ProofGenerated,
    PresentationSent,
    AckReceived,
    Rejected,
}

impl ProverEvent {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::CredentialsSelected => "select credentials",
            Self::ProofGenerated => "generate proof",
            Self::PresentationSent => "send presentation",
            Self::AckReceived => "apply presentation ack",
            Self::Rejected => "apply presentation rejection",
        }
    }
}

impl ProverState {
    /// Selection may be redone until a proof is generated; each later phase
    /// requires its direct predecessor.
    pub fn transition(self, event: ProverEvent) -> Result<Self> {
        match (self, event) {
            (Self::RequestReceived | Self::CredentialsSelected, ProverEvent::CredentialsSelected) => {
                Ok(Self::CredentialsSelected)
            }
            (Self::CredentialsSelected, ProverEvent::ProofGenerated) => Ok(Self::ProofGenerated),
            (Self::ProofGenerated, ProverEvent::PresentationSent) => Ok(Self::PresentationSent),
            (Self::PresentationSent, ProverEvent::AckReceived) => Ok(Self::PresentationAckReceived),
            (Self::PresentationAckReceived, ProverEvent::AckReceived) => {
                Ok(Self::PresentationAckReceived)
            }
            (Self::PresentationSent, ProverEvent::Rejected) => Ok(Self::Failed),
            (state, event) => Err(Error::invalid_state("disclosed proof", state, event.describe())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PresentationAckReceived | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestReceived => "RequestReceived",
            Self::CredentialsSelected => "CredentialsSelected",
            Self::ProofGenerated => "ProofGenerated",
            Self::PresentationSent => "PresentationSent",
            Self::PresentationAckReceived => "PresentationAckReceived",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for ProverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
