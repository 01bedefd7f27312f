//! Protocol payloads exchanged with the collaborator library
//!
//! Invitations, credential offers and proof requests arrive as JSON from the
//! inviter/issuer/verifier. Everything here is plain data plus the pure checks
//! the protocol machines need (self-attestability, disclosure completeness).

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Out-of-band connection invitation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    #[serde(alias = "@id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, rename = "recipientKeys", skip_serializing_if = "Vec::is_empty")]
    pub recipient_keys: Vec<String>,
    #[serde(default, rename = "routingKeys", skip_serializing_if = "Vec::is_empty")]
    pub routing_keys: Vec<String>,
    #[serde(default, rename = "serviceEndpoint", skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<String>,
}

impl Invitation {
    pub fn parse(payload: &str) -> Result<Self> {
        let invitation: Invitation = serde_json::from_str(payload)
            .map_err(|e| Error::protocol(format!("malformed invitation: {}", e)))?;
        if invitation.id.trim().is_empty() {
            return Err(Error::protocol("malformed invitation: empty id"));
        }
        Ok(invitation)
    }
}

/// Connection protocol message delivered by the inviter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionMessage {
    Response,
    Ack,
    ProblemReport(String),
}

/// Agency message status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    #[serde(rename = "MS-101")]
    Created,
    #[serde(rename = "MS-102")]
    Sent,
    #[serde(rename = "MS-103")]
    Received,
    #[serde(rename = "MS-104")]
    Accepted,
    #[serde(rename = "MS-105")]
    Rejected,
    #[serde(rename = "MS-106")]
    Reviewed,
}

impl MessageStatus {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Created => "MS-101",
            Self::Sent => "MS-102",
            Self::Received => "MS-103",
            Self::Accepted => "MS-104",
            Self::Rejected => "MS-105",
            Self::Reviewed => "MS-106",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MessageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MS-101" => Ok(Self::Created),
            "MS-102" => Ok(Self::Sent),
            "MS-103" => Ok(Self::Received),
            "MS-104" => Ok(Self::Accepted),
            "MS-105" => Ok(Self::Rejected),
            "MS-106" => Ok(Self::Reviewed),
            other => Err(Error::protocol(format!("unknown message status: {}", other))),
        }
    }
}

/// Message queued at the agency for a connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgencyMessage {
    pub uid: String,
    #[serde(rename = "statusCode")]
    pub status_code: MessageStatus,
    pub payload: String,
    #[serde(rename = "senderDID", default, skip_serializing_if = "Option::is_none")]
    pub sender_did: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Protocols the peer disclosed in response to a feature-discovery query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub protocols: Vec<ProtocolDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    pub pid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

impl FeatureSet {
    /// Whether any disclosed protocol id starts with `prefix`.
    pub fn supports(&self, prefix: &str) -> bool {
        self.protocols.iter().any(|p| p.pid.starts_with(prefix))
    }
}

// ---------------------------------------------------------------------------
// Credential issuance (holder side)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialOffer {
    pub thread_id: String,
    pub schema_id: String,
    pub cred_def_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Credential preview: attribute name to offered raw value.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssuedCredential {
    /// Wallet referent of the stored credential.
    pub referent: String,
    pub schema_id: String,
    pub cred_def_id: String,
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev_reg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred_rev_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CredentialMessage {
    Issued(IssuedCredential),
    ProblemReport(String),
}

/// Revocation registry metadata a revocable credential refers to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationMetadata {
    pub rev_reg_id: String,
    pub tails_location: String,
    pub tails_hash: String,
}

// ---------------------------------------------------------------------------
// Proof presentation (prover side)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonRevokedInterval {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevokedInterval>,
}

impl AttributeRequest {
    /// A single, unrestricted attribute may be answered with a self-attested value.
    pub fn is_self_attestable(&self) -> bool {
        if self.name.is_none() || self.names.is_some() {
            return false;
        }
        match &self.restrictions {
            None | Some(serde_json::Value::Null) => true,
            Some(serde_json::Value::Array(a)) => a.is_empty(),
            Some(serde_json::Value::Object(o)) => o.is_empty(),
            Some(_) => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredicateRequest {
    pub name: String,
    pub p_type: String,
    pub p_value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevokedInterval>,
}

/// Verifier's proof request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProofRequest {
    pub nonce: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_request_version")]
    pub version: String,
    #[serde(default)]
    pub requested_attributes: BTreeMap<String, AttributeRequest>,
    #[serde(default)]
    pub requested_predicates: BTreeMap<String, PredicateRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevokedInterval>,
}

fn default_request_version() -> String {
    "1.0".to_string()
}

impl ProofRequest {
    pub fn parse(payload: &str) -> Result<Self> {
        let request: ProofRequest = serde_json::from_str(payload)
            .map_err(|e| Error::protocol(format!("malformed proof request: {}", e)))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nonce.trim().is_empty() {
            return Err(Error::protocol("proof request has an empty nonce"));
        }
        if self.requested_attributes.is_empty() && self.requested_predicates.is_empty() {
            return Err(Error::protocol("proof request asks for nothing"));
        }
        for (referent, attr) in &self.requested_attributes {
            if attr.name.is_none() && attr.names.as_ref().map_or(true, |n| n.is_empty()) {
                return Err(Error::protocol(format!(
                    "requested attribute {} has neither name nor names",
                    referent
                )));
            }
        }
        Ok(())
    }

    /// Referents that would remain undisclosed after merging `selected` and
    /// `self_attested`. Self-attested values only count for self-attestable groups.
    pub fn unresolved_groups(
        &self,
        selected: &SelectedCredentials,
        self_attested: &SelfAttested,
    ) -> Vec<String> {
        let mut missing = Vec::new();
        for (referent, attr) in &self.requested_attributes {
            let attested = attr.is_self_attestable() && self_attested.contains_key(referent);
            if !selected.attrs.contains_key(referent) && !attested {
                missing.push(referent.clone());
            }
        }
        for referent in self.requested_predicates.keys() {
            if !selected.predicates.contains_key(referent) {
                missing.push(referent.clone());
            }
        }
        missing
    }
}

/// Wallet credential as described to the prover.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialInfo {
    pub referent: String,
    pub attrs: BTreeMap<String, String>,
    pub schema_id: String,
    pub cred_def_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev_reg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cred_rev_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialCandidate {
    pub cred_info: CredentialInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<NonRevokedInterval>,
}

/// Candidates per requested group, as found in the holder's wallet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedCredentials {
    #[serde(default)]
    pub attrs: BTreeMap<String, Vec<CredentialCandidate>>,
    #[serde(default)]
    pub predicates: BTreeMap<String, Vec<CredentialCandidate>>,
}

/// Revocation tails artifact backing a revocable credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailsArtifact {
    pub rev_reg_id: String,
    pub location: String,
    pub hash: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectedCredential {
    pub credential: CredentialCandidate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tails: Option<TailsArtifact>,
}

/// Credential chosen for every group that could be matched from the wallet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectedCredentials {
    #[serde(default)]
    pub attrs: BTreeMap<String, SelectedCredential>,
    #[serde(default)]
    pub predicates: BTreeMap<String, SelectedCredential>,
}

impl SelectedCredentials {
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty() && self.predicates.is_empty()
    }
}

/// Referent to self-attested raw value.
pub type SelfAttested = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevealedAttribute {
    pub sub_proof_index: usize,
    pub raw: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestedProof {
    pub revealed_attrs: BTreeMap<String, RevealedAttribute>,
    pub self_attested_attrs: BTreeMap<String, String>,
    pub predicates: BTreeMap<String, usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProofIdentifier {
    pub schema_id: String,
    pub cred_def_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev_reg_id: Option<String>,
}

/// Generated presentation, bound to the request nonce.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Presentation {
    pub nonce: String,
    pub requested_proof: RequestedProof,
    pub identifiers: Vec<ProofIdentifier>,
    /// Digest binding the disclosure to the nonce.
    pub binding: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentationMessage {
    Ack,
    ProblemReport(String),
}
