//! InMemoryVcx: deterministic collaborator for tests and the demo
//!
//! Plays both sides of the wire: the local wallet/agency library the agent
//! calls through `VcxLibrary`, and the remote peer (inviter, issuer,
//! verifier) whose behaviour tests script through the `peer_*` methods.
//! Every library call fails unless the native context is open, so session
//! discipline violations surface immediately.

use crate::library::VcxLibrary;
use crate::tails::sha256_hex;
use ariesagent_core::{
    AgencyMessage, AgentConfig, ConnectionHandle, ConnectionMessage, CredentialCandidate,
    CredentialHandle, CredentialInfo, CredentialMessage, CredentialOffer, Error, FeatureSet,
    Invitation, IssuedCredential, MessageStatus, NonRevokedInterval, Presentation,
    PresentationMessage, ProofHandle, ProofIdentifier, ProofRequest, ProtocolDescriptor,
    RequestedProof, Result, RetrievedCredentials, RevealedAttribute, RevocationMetadata,
    SelectedCredential, SelectedCredentials, SelfAttested,
};
use ring::signature::{self, KeyPair};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Everything the agent sent to the peer, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    ConnectionRequest,
    Message(String),
    Ping { comment: Option<String> },
    FeatureQuery,
    CredentialRequest { thread_id: String },
    Presentation(Presentation),
}

/// Native context open/close counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub opened: usize,
    pub closed: usize,
}

struct PeerConnection {
    invitation: Invitation,
    inbound: VecDeque<ConnectionMessage>,
    offers: Vec<CredentialOffer>,
    /// Issuer replies keyed by offer thread id.
    issuance: HashMap<String, VecDeque<CredentialMessage>>,
    presentation_replies: VecDeque<PresentationMessage>,
    agency: Vec<AgencyMessage>,
    outbound: Vec<OutboundMessage>,
}

impl PeerConnection {
    fn new(invitation: Invitation) -> Self {
        Self {
            invitation,
            inbound: VecDeque::new(),
            offers: Vec::new(),
            issuance: HashMap::new(),
            presentation_replies: VecDeque::new(),
            agency: Vec::new(),
            outbound: Vec::new(),
        }
    }
}

struct HolderCredential {
    connection: u32,
    offer: CredentialOffer,
}

struct ProofObject {
    request: ProofRequest,
    presentation: Option<Presentation>,
    sent_on: Option<u32>,
}

#[derive(Default)]
struct Ledger {
    seed: Option<String>,
    fail_next_open: Option<String>,
    connections: HashMap<u32, PeerConnection>,
    by_invitation: HashMap<String, u32>,
    credentials: HashMap<u32, HolderCredential>,
    proofs: HashMap<u32, ProofObject>,
    wallet: Vec<CredentialInfo>,
    registries: HashMap<String, RevocationMetadata>,
    peer_features: FeatureSet,
}

pub struct InMemoryVcx {
    ledger: Mutex<Ledger>,
    open: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
    next_handle: AtomicU32,
}

impl Default for InMemoryVcx {
    fn default() -> Self {
        Self::new()
    }
}

fn default_peer_features() -> FeatureSet {
    let protocol = |pid: &str, roles: &[&str]| ProtocolDescriptor {
        pid: pid.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    };
    FeatureSet {
        protocols: vec![
            protocol("https://didcomm.org/connections/1.0/", &["inviter", "invitee"]),
            protocol("https://didcomm.org/issue-credential/1.0/", &["issuer"]),
            protocol("https://didcomm.org/present-proof/1.0/", &["verifier"]),
            protocol("https://didcomm.org/trust_ping/1.0/", &["sender", "receiver"]),
            protocol("https://didcomm.org/discover-features/1.0/", &["requester", "responder"]),
            protocol("https://didcomm.org/basicmessage/1.0/", &[]),
        ],
    }
}

impl InMemoryVcx {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                peer_features: default_peer_features(),
                ..Default::default()
            }),
            open: AtomicBool::new(false),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            next_handle: AtomicU32::new(1),
        }
    }

    fn next_handle(&self) -> u32 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::library(operation, "native context is not initialised"))
        }
    }

    // -- probes -------------------------------------------------------------

    pub fn context_stats(&self) -> ContextStats {
        ContextStats {
            opened: self.opened.load(Ordering::SeqCst),
            closed: self.closed.load(Ordering::SeqCst),
        }
    }

    pub fn is_context_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Make the next `open_context` fail after partially initialising.
    pub async fn fail_next_open(&self, reason: impl Into<String>) {
        self.ledger.lock().await.fail_next_open = Some(reason.into());
    }

    // -- remote peer --------------------------------------------------------

    pub async fn peer_respond(&self, invitation_id: &str) -> Result<()> {
        self.push_connection_message(invitation_id, ConnectionMessage::Response).await
    }

    pub async fn peer_ack(&self, invitation_id: &str) -> Result<()> {
        self.push_connection_message(invitation_id, ConnectionMessage::Ack).await
    }

    pub async fn peer_problem_report(&self, invitation_id: &str, reason: &str) -> Result<()> {
        self.push_connection_message(invitation_id, ConnectionMessage::ProblemReport(reason.into()))
            .await
    }

    async fn push_connection_message(
        &self,
        invitation_id: &str,
        message: ConnectionMessage,
    ) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        peer_connection(&mut ledger, invitation_id)?.inbound.push_back(message);
        Ok(())
    }

    pub async fn peer_offer_credential(&self, invitation_id: &str, offer: CredentialOffer) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        peer_connection(&mut ledger, invitation_id)?.offers.push(offer);
        Ok(())
    }

    /// Issue the credential requested under `thread_id`, optionally revocable.
    pub async fn peer_issue_credential(
        &self,
        invitation_id: &str,
        thread_id: &str,
        rev_reg_id: Option<&str>,
    ) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        let handle = peer_handle(&ledger, invitation_id)?;
        let offer = ledger
            .credentials
            .values()
            .find(|c| c.connection == handle && c.offer.thread_id == thread_id)
            .map(|c| c.offer.clone())
            .ok_or_else(|| Error::not_found(format!("credential request for thread {}", thread_id)))?;
        let issued = IssuedCredential {
            referent: uuid::Uuid::new_v4().to_string(),
            schema_id: offer.schema_id.clone(),
            cred_def_id: offer.cred_def_id.clone(),
            attributes: offer.attributes.clone(),
            rev_reg_id: rev_reg_id.map(String::from),
            cred_rev_id: rev_reg_id.map(|_| "1".to_string()),
        };
        peer_connection(&mut ledger, invitation_id)?
            .issuance
            .entry(thread_id.to_string())
            .or_default()
            .push_back(CredentialMessage::Issued(issued));
        Ok(())
    }

    pub async fn peer_reject_credential(
        &self,
        invitation_id: &str,
        thread_id: &str,
        reason: &str,
    ) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        peer_connection(&mut ledger, invitation_id)?
            .issuance
            .entry(thread_id.to_string())
            .or_default()
            .push_back(CredentialMessage::ProblemReport(reason.to_string()));
        Ok(())
    }

    pub async fn peer_ack_presentation(&self, invitation_id: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        peer_connection(&mut ledger, invitation_id)?
            .presentation_replies
            .push_back(PresentationMessage::Ack);
        Ok(())
    }

    pub async fn peer_reject_presentation(&self, invitation_id: &str, reason: &str) -> Result<()> {
        let mut ledger = self.ledger.lock().await;
        peer_connection(&mut ledger, invitation_id)?
            .presentation_replies
            .push_back(PresentationMessage::ProblemReport(reason.to_string()));
        Ok(())
    }

    /// Queue a message at the agency mailbox of a connection.
    pub async fn peer_queue_message(
        &self,
        invitation_id: &str,
        status: MessageStatus,
        payload: &str,
    ) -> Result<String> {
        let mut ledger = self.ledger.lock().await;
        let connection = peer_connection(&mut ledger, invitation_id)?;
        let uid = uuid::Uuid::new_v4().to_string();
        let sender_did = connection.invitation.recipient_keys.first().cloned();
        connection.agency.push(AgencyMessage {
            uid: uid.clone(),
            status_code: status,
            payload: payload.to_string(),
            sender_did,
            received_at: chrono::Utc::now(),
        });
        Ok(uid)
    }

    pub async fn set_peer_features(&self, features: FeatureSet) {
        self.ledger.lock().await.peer_features = features;
    }

    pub async fn register_revocation_registry(&self, metadata: RevocationMetadata) {
        let mut ledger = self.ledger.lock().await;
        ledger.registries.insert(metadata.rev_reg_id.clone(), metadata);
    }

    /// Put a credential straight into the holder wallet.
    pub async fn add_wallet_credential(&self, credential: CredentialInfo) {
        self.ledger.lock().await.wallet.push(credential);
    }

    pub async fn wallet_credentials(&self) -> Vec<CredentialInfo> {
        self.ledger.lock().await.wallet.clone()
    }

    pub async fn outbound(&self, invitation_id: &str) -> Vec<OutboundMessage> {
        let ledger = self.ledger.lock().await;
        ledger
            .by_invitation
            .get(invitation_id)
            .and_then(|h| ledger.connections.get(h))
            .map(|c| c.outbound.clone())
            .unwrap_or_default()
    }

    /// Verify a signature the agent produced, as the peer would.
    pub async fn peer_verify(&self, invitation_id: &str, data: &[u8], signature: &[u8]) -> Result<bool> {
        let ledger = self.ledger.lock().await;
        let handle = peer_handle(&ledger, invitation_id)?;
        let key = pairwise_key(&ledger, handle)?;
        Ok(verify_with(&key, data, signature))
    }
}

fn peer_handle(ledger: &Ledger, invitation_id: &str) -> Result<u32> {
    ledger
        .by_invitation
        .get(invitation_id)
        .copied()
        .ok_or_else(|| Error::not_found(format!("connection for invitation {}", invitation_id)))
}

fn peer_connection<'a>(ledger: &'a mut Ledger, invitation_id: &str) -> Result<&'a mut PeerConnection> {
    let handle = peer_handle(ledger, invitation_id)?;
    ledger
        .connections
        .get_mut(&handle)
        .ok_or_else(|| Error::not_found(format!("connection for invitation {}", invitation_id)))
}

fn connection_mut<'a>(
    ledger: &'a mut Ledger,
    handle: ConnectionHandle,
    operation: &str,
) -> Result<&'a mut PeerConnection> {
    ledger
        .connections
        .get_mut(&handle.0)
        .ok_or_else(|| Error::library(operation, format!("unknown {}", handle)))
}

/// Pairwise Ed25519 key derived from the wallet seed and the invitation id.
fn pairwise_key(ledger: &Ledger, handle: u32) -> Result<signature::Ed25519KeyPair> {
    let seed = ledger
        .seed
        .as_ref()
        .ok_or_else(|| Error::library("sign_data", "wallet seed not loaded"))?;
    let connection = ledger
        .connections
        .get(&handle)
        .ok_or_else(|| Error::library("sign_data", format!("unknown ConnectionHandle#{}", handle)))?;
    let mut material = seed.as_bytes().to_vec();
    material.extend_from_slice(connection.invitation.id.as_bytes());
    let derived = ring::digest::digest(&ring::digest::SHA256, &material);
    signature::Ed25519KeyPair::from_seed_unchecked(derived.as_ref())
        .map_err(|e| Error::library("sign_data", format!("key rejected: {}", e)))
}

fn verify_with(key: &signature::Ed25519KeyPair, data: &[u8], sig: &[u8]) -> bool {
    signature::UnparsedPublicKey::new(&signature::ED25519, key.public_key().as_ref())
        .verify(data, sig)
        .is_ok()
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

fn attr_value<'a>(info: &'a CredentialInfo, name: &str) -> Option<&'a String> {
    let wanted = normalize(name);
    info.attrs
        .iter()
        .find(|(k, _)| normalize(k) == wanted)
        .map(|(_, v)| v)
}

/// `restrictions` is an any-of list of filters on the credential identifiers.
fn satisfies(info: &CredentialInfo, restrictions: &Option<serde_json::Value>) -> bool {
    let filters: Vec<&serde_json::Map<String, serde_json::Value>> = match restrictions {
        None | Some(serde_json::Value::Null) => return true,
        Some(serde_json::Value::Object(o)) => vec![o],
        Some(serde_json::Value::Array(a)) => a.iter().filter_map(|v| v.as_object()).collect(),
        Some(_) => return false,
    };
    if filters.is_empty() {
        return true;
    }
    let issuer_did = info.cred_def_id.split(':').next().unwrap_or_default();
    filters.iter().any(|filter| {
        filter.iter().all(|(key, value)| {
            let value = value.as_str().unwrap_or_default();
            match key.as_str() {
                "cred_def_id" => info.cred_def_id == value,
                "schema_id" => info.schema_id == value,
                "issuer_did" => issuer_did == value,
                _ => false,
            }
        })
    })
}

fn predicate_holds(raw: &str, p_type: &str, p_value: i64) -> bool {
    let Ok(value) = raw.trim().parse::<i64>() else {
        return false;
    };
    match p_type {
        ">=" => value >= p_value,
        ">" => value > p_value,
        "<=" => value <= p_value,
        "<" => value < p_value,
        _ => false,
    }
}

fn candidate(info: &CredentialInfo, interval: &Option<NonRevokedInterval>) -> CredentialCandidate {
    CredentialCandidate {
        cred_info: info.clone(),
        interval: info.rev_reg_id.as_ref().and(interval.clone()),
    }
}

#[async_trait::async_trait]
impl VcxLibrary for InMemoryVcx {
    async fn open_context(&self, config: &AgentConfig) -> Result<()> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(Error::library("open_context", "native context already initialised"));
        }
        let mut ledger = self.ledger.lock().await;
        if let Some(reason) = ledger.fail_next_open.take() {
            return Err(Error::library("open_context", reason));
        }
        config
            .validate()
            .map_err(|e| Error::library("open_context", e.to_string()))?;
        ledger.seed = Some(config.seed.clone());
        debug!("native context opened for {}", config.agent_name);
        Ok(())
    }

    fn close_context(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    async fn create_connection(&self, invitation: &Invitation) -> Result<ConnectionHandle> {
        self.ensure_open("create_connection")?;
        let handle = self.next_handle();
        let mut ledger = self.ledger.lock().await;
        ledger
            .connections
            .insert(handle, PeerConnection::new(invitation.clone()));
        ledger.by_invitation.insert(invitation.id.clone(), handle);
        Ok(ConnectionHandle(handle))
    }

    async fn send_connection_request(&self, connection: ConnectionHandle) -> Result<()> {
        self.ensure_open("send_connection_request")?;
        let mut ledger = self.ledger.lock().await;
        connection_mut(&mut ledger, connection, "send_connection_request")?
            .outbound
            .push(OutboundMessage::ConnectionRequest);
        Ok(())
    }

    async fn poll_connection(&self, connection: ConnectionHandle) -> Result<Option<ConnectionMessage>> {
        self.ensure_open("poll_connection")?;
        let mut ledger = self.ledger.lock().await;
        Ok(connection_mut(&mut ledger, connection, "poll_connection")?
            .inbound
            .pop_front())
    }

    async fn send_message(&self, connection: ConnectionHandle, message: &str) -> Result<()> {
        self.ensure_open("send_message")?;
        let mut ledger = self.ledger.lock().await;
        connection_mut(&mut ledger, connection, "send_message")?
            .outbound
            .push(OutboundMessage::Message(message.to_string()));
        Ok(())
    }

    async fn sign_data(&self, connection: ConnectionHandle, data: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open("sign_data")?;
        let ledger = self.ledger.lock().await;
        let key = pairwise_key(&ledger, connection.0)?;
        Ok(key.sign(data).as_ref().to_vec())
    }

    async fn verify_signature(
        &self,
        connection: ConnectionHandle,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        self.ensure_open("verify_signature")?;
        let ledger = self.ledger.lock().await;
        let key = pairwise_key(&ledger, connection.0)?;
        Ok(verify_with(&key, data, signature))
    }

    async fn send_ping(&self, connection: ConnectionHandle, comment: Option<&str>) -> Result<()> {
        self.ensure_open("send_ping")?;
        let mut ledger = self.ledger.lock().await;
        connection_mut(&mut ledger, connection, "send_ping")?
            .outbound
            .push(OutboundMessage::Ping {
                comment: comment.map(String::from),
            });
        Ok(())
    }

    async fn discover_features(&self, connection: ConnectionHandle) -> Result<FeatureSet> {
        self.ensure_open("discover_features")?;
        let mut ledger = self.ledger.lock().await;
        connection_mut(&mut ledger, connection, "discover_features")?
            .outbound
            .push(OutboundMessage::FeatureQuery);
        Ok(ledger.peer_features.clone())
    }

    async fn fetch_messages(
        &self,
        connection: ConnectionHandle,
        statuses: &[MessageStatus],
    ) -> Result<Vec<AgencyMessage>> {
        self.ensure_open("fetch_messages")?;
        let mut ledger = self.ledger.lock().await;
        let connection = connection_mut(&mut ledger, connection, "fetch_messages")?;
        Ok(connection
            .agency
            .iter()
            .filter(|m| statuses.is_empty() || statuses.contains(&m.status_code))
            .cloned()
            .collect())
    }

    async fn poll_credential_offers(&self, connection: ConnectionHandle) -> Result<Vec<CredentialOffer>> {
        self.ensure_open("poll_credential_offers")?;
        let mut ledger = self.ledger.lock().await;
        Ok(connection_mut(&mut ledger, connection, "poll_credential_offers")?
            .offers
            .clone())
    }

    async fn send_credential_request(
        &self,
        connection: ConnectionHandle,
        offer: &CredentialOffer,
    ) -> Result<CredentialHandle> {
        self.ensure_open("send_credential_request")?;
        let mut ledger = self.ledger.lock().await;
        let peer = connection_mut(&mut ledger, connection, "send_credential_request")?;
        let position = peer
            .offers
            .iter()
            .position(|o| o.thread_id == offer.thread_id)
            .ok_or_else(|| {
                Error::library(
                    "send_credential_request",
                    format!("no pending offer on thread {}", offer.thread_id),
                )
            })?;
        let offer = peer.offers.remove(position);
        peer.outbound.push(OutboundMessage::CredentialRequest {
            thread_id: offer.thread_id.clone(),
        });
        let handle = self.next_handle();
        ledger.credentials.insert(
            handle,
            HolderCredential {
                connection: connection.0,
                offer,
            },
        );
        Ok(CredentialHandle(handle))
    }

    async fn poll_credential(
        &self,
        credential: CredentialHandle,
        connection: ConnectionHandle,
    ) -> Result<Option<CredentialMessage>> {
        self.ensure_open("poll_credential")?;
        let mut ledger = self.ledger.lock().await;
        let thread_id = ledger
            .credentials
            .get(&credential.0)
            .map(|c| c.offer.thread_id.clone())
            .ok_or_else(|| Error::library("poll_credential", format!("unknown {}", credential)))?;
        let message = connection_mut(&mut ledger, connection, "poll_credential")?
            .issuance
            .get_mut(&thread_id)
            .and_then(|queue| queue.pop_front());
        Ok(message)
    }

    async fn store_credential(
        &self,
        credential: CredentialHandle,
        issued: &IssuedCredential,
    ) -> Result<()> {
        self.ensure_open("store_credential")?;
        let mut ledger = self.ledger.lock().await;
        if !ledger.credentials.contains_key(&credential.0) {
            return Err(Error::library("store_credential", format!("unknown {}", credential)));
        }
        if ledger.wallet.iter().any(|c| c.referent == issued.referent) {
            return Ok(());
        }
        ledger.wallet.push(CredentialInfo {
            referent: issued.referent.clone(),
            attrs: issued.attributes.clone(),
            schema_id: issued.schema_id.clone(),
            cred_def_id: issued.cred_def_id.clone(),
            rev_reg_id: issued.rev_reg_id.clone(),
            cred_rev_id: issued.cred_rev_id.clone(),
        });
        Ok(())
    }

    async fn revocation_registry(&self, rev_reg_id: &str) -> Result<RevocationMetadata> {
        self.ensure_open("revocation_registry")?;
        let ledger = self.ledger.lock().await;
        ledger.registries.get(rev_reg_id).cloned().ok_or_else(|| {
            Error::library(
                "revocation_registry",
                format!("registry {} not on ledger", rev_reg_id),
            )
        })
    }

    async fn create_proof(&self, request: &ProofRequest) -> Result<ProofHandle> {
        self.ensure_open("create_proof")?;
        let handle = self.next_handle();
        self.ledger.lock().await.proofs.insert(
            handle,
            ProofObject {
                request: request.clone(),
                presentation: None,
                sent_on: None,
            },
        );
        Ok(ProofHandle(handle))
    }

    async fn retrieve_credentials(&self, proof: ProofHandle) -> Result<RetrievedCredentials> {
        self.ensure_open("retrieve_credentials")?;
        let ledger = self.ledger.lock().await;
        let request = &ledger
            .proofs
            .get(&proof.0)
            .ok_or_else(|| Error::library("retrieve_credentials", format!("unknown {}", proof)))?
            .request;
        let mut retrieved = RetrievedCredentials::default();
        for (referent, attr) in &request.requested_attributes {
            let names: Vec<&String> = match (&attr.name, &attr.names) {
                (_, Some(names)) => names.iter().collect(),
                (Some(name), None) => vec![name],
                (None, None) => Vec::new(),
            };
            let interval = attr.non_revoked.clone().or_else(|| request.non_revoked.clone());
            let matches = ledger
                .wallet
                .iter()
                .filter(|c| names.iter().all(|n| attr_value(c, n).is_some()))
                .filter(|c| satisfies(c, &attr.restrictions))
                .map(|c| candidate(c, &interval))
                .collect();
            retrieved.attrs.insert(referent.clone(), matches);
        }
        for (referent, pred) in &request.requested_predicates {
            let interval = pred.non_revoked.clone().or_else(|| request.non_revoked.clone());
            let matches = ledger
                .wallet
                .iter()
                .filter(|c| {
                    attr_value(c, &pred.name)
                        .map_or(false, |raw| predicate_holds(raw, &pred.p_type, pred.p_value))
                })
                .filter(|c| satisfies(c, &pred.restrictions))
                .map(|c| candidate(c, &interval))
                .collect();
            retrieved.predicates.insert(referent.clone(), matches);
        }
        Ok(retrieved)
    }

    async fn generate_proof(
        &self,
        proof: ProofHandle,
        selected: &SelectedCredentials,
        self_attested: &SelfAttested,
    ) -> Result<Presentation> {
        self.ensure_open("generate_proof")?;
        let mut ledger = self.ledger.lock().await;
        let object = ledger
            .proofs
            .get_mut(&proof.0)
            .ok_or_else(|| Error::library("generate_proof", format!("unknown {}", proof)))?;

        let mut identifiers: Vec<ProofIdentifier> = Vec::new();
        let mut sub_proofs: BTreeMap<String, usize> = BTreeMap::new();
        let mut index_of = |choice: &SelectedCredential| -> Result<usize> {
            let info = &choice.credential.cred_info;
            if info.rev_reg_id.is_some() && choice.tails.is_none() {
                return Err(Error::library(
                    "generate_proof",
                    format!("credential {} is revocable but no tails were supplied", info.referent),
                ));
            }
            if let Some(index) = sub_proofs.get(&info.referent) {
                return Ok(*index);
            }
            identifiers.push(ProofIdentifier {
                schema_id: info.schema_id.clone(),
                cred_def_id: info.cred_def_id.clone(),
                rev_reg_id: info.rev_reg_id.clone(),
            });
            let index = identifiers.len() - 1;
            sub_proofs.insert(info.referent.clone(), index);
            Ok(index)
        };

        let mut requested_proof = RequestedProof::default();
        for (referent, choice) in &selected.attrs {
            let index = index_of(choice)?;
            let raw = object
                .request
                .requested_attributes
                .get(referent)
                .map(|attr| {
                    let names: Vec<&String> = match (&attr.name, &attr.names) {
                        (_, Some(names)) => names.iter().collect(),
                        (Some(name), None) => vec![name],
                        (None, None) => Vec::new(),
                    };
                    names
                        .iter()
                        .filter_map(|n| attr_value(&choice.credential.cred_info, n).cloned())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            requested_proof.revealed_attrs.insert(
                referent.clone(),
                RevealedAttribute {
                    sub_proof_index: index,
                    raw,
                },
            );
        }
        for (referent, choice) in &selected.predicates {
            let index = index_of(choice)?;
            requested_proof.predicates.insert(referent.clone(), index);
        }
        requested_proof.self_attested_attrs = self_attested.clone();

        let mut bound = object.request.nonce.clone().into_bytes();
        bound.extend_from_slice(&serde_json::to_vec(&requested_proof)?);
        let presentation = Presentation {
            nonce: object.request.nonce.clone(),
            requested_proof,
            identifiers,
            binding: sha256_hex(&bound),
        };
        object.presentation = Some(presentation.clone());
        Ok(presentation)
    }

    async fn send_proof(&self, proof: ProofHandle, connection: ConnectionHandle) -> Result<()> {
        self.ensure_open("send_proof")?;
        let mut ledger = self.ledger.lock().await;
        let presentation = ledger
            .proofs
            .get(&proof.0)
            .and_then(|p| p.presentation.clone())
            .ok_or_else(|| Error::library("send_proof", format!("{} has no generated proof", proof)))?;
        connection_mut(&mut ledger, connection, "send_proof")?
            .outbound
            .push(OutboundMessage::Presentation(presentation));
        if let Some(object) = ledger.proofs.get_mut(&proof.0) {
            object.sent_on = Some(connection.0);
        }
        Ok(())
    }

    async fn poll_presentation(
        &self,
        proof: ProofHandle,
        connection: ConnectionHandle,
    ) -> Result<Option<PresentationMessage>> {
        self.ensure_open("poll_presentation")?;
        let mut ledger = self.ledger.lock().await;
        let sent_here = ledger
            .proofs
            .get(&proof.0)
            .map(|p| p.sent_on == Some(connection.0))
            .ok_or_else(|| Error::library("poll_presentation", format!("unknown {}", proof)))?;
        if !sent_here {
            return Ok(None);
        }
        Ok(connection_mut(&mut ledger, connection, "poll_presentation")?
            .presentation_replies
            .pop_front())
    }
}
