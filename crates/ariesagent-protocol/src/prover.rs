//! Disclosed proof protocol (prover side)
//!
//! build -> select_credentials -> generate_proof -> send -> update. The first
//! three phases are local; only `send` touches the wire.

use crate::connection::ConnectionService;
use ariesagent_core::{
    ConnectionId, CredentialCandidate, Error, Presentation, PresentationMessage, ProofHandle,
    ProofId, ProofRequest, ProverEvent, ProverState, Result, SelectedCredential,
    SelectedCredentials, SelfAttested, TailsArtifact,
};
use ariesagent_vcx::{TailsResolver, VcxLibrary};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Serialize)]
pub struct ProofRecord {
    pub id: ProofId,
    pub handle: ProofHandle,
    pub request: ProofRequest,
    pub state: ProverState,
    pub selection: Option<SelectedCredentials>,
    pub presentation: Option<Presentation>,
    pub connection_id: Option<ConnectionId>,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ProverService {
    library: Arc<dyn VcxLibrary>,
    connections: Arc<ConnectionService>,
    records: DashMap<ProofId, ProofRecord>,
}

/// Tails lookups made while computing one selection, keyed by registry id.
type TailsCache = BTreeMap<String, TailsArtifact>;

impl ProverService {
    pub fn new(library: Arc<dyn VcxLibrary>, connections: Arc<ConnectionService>) -> Self {
        Self {
            library,
            connections,
            records: DashMap::new(),
        }
    }

    /// Parse a verifier's proof request and create the record in `RequestReceived`.
    ///
    /// An id can be reused once its previous exchange has finished.
    pub async fn build(&self, id: &ProofId, request: &str) -> Result<ProverState> {
        if let Some(existing) = self.records.get(id).map(|r| r.state) {
            if !existing.is_terminal() {
                return Err(Error::protocol(format!(
                    "proof {} already in progress ({})",
                    id, existing
                )));
            }
        }
        let request = ProofRequest::parse(request)?;
        let handle = self.library.create_proof(&request).await?;
        let state = ProverState::RequestReceived;
        let now = Utc::now();
        info!(
            "Proof {} built from request '{}' ({} attributes, {} predicates)",
            id,
            request.name,
            request.requested_attributes.len(),
            request.requested_predicates.len()
        );
        self.records.insert(
            id.clone(),
            ProofRecord {
                id: id.clone(),
                handle,
                request,
                state,
                selection: None,
                presentation: None,
                connection_id: None,
                failure: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(state)
    }

    /// Pick the first wallet match for every requested group.
    ///
    /// Groups with no match are left out for the caller to self-attest.
    /// Revocable matches need their tails artifact from `resolver`; without
    /// one the whole selection fails with `MissingResolver`.
    pub async fn select_credentials(
        &self,
        id: &ProofId,
        resolver: Option<&dyn TailsResolver>,
    ) -> Result<SelectedCredentials> {
        let record = self.record(id)?;
        let next = record.state.transition(ProverEvent::CredentialsSelected)?;
        let retrieved = self.library.retrieve_credentials(record.handle).await?;

        let mut tails = TailsCache::new();
        let mut selection = SelectedCredentials::default();
        for (referent, candidates) in &retrieved.attrs {
            if let Some(chosen) = select(referent, candidates, resolver, &mut tails).await? {
                selection.attrs.insert(referent.clone(), chosen);
            }
        }
        for (referent, candidates) in &retrieved.predicates {
            if let Some(chosen) = select(referent, candidates, resolver, &mut tails).await? {
                selection.predicates.insert(referent.clone(), chosen);
            }
        }

        let open = record
            .request
            .unresolved_groups(&selection, &SelfAttested::new());
        if let Some(mut entry) = self.records.get_mut(id) {
            entry.state = next;
            entry.selection = Some(selection.clone());
            entry.updated_at = Utc::now();
        }
        info!(
            "Proof {} selected {} attribute and {} predicate credentials, {} groups open -> {}",
            id,
            selection.attrs.len(),
            selection.predicates.len(),
            open.len(),
            next
        );
        Ok(selection)
    }

    /// Merge the selection with self-attested values and generate the proof.
    pub async fn generate_proof(
        &self,
        id: &ProofId,
        selected: &SelectedCredentials,
        self_attested: &SelfAttested,
    ) -> Result<ProverState> {
        let record = self.record(id)?;
        let next = record.state.transition(ProverEvent::ProofGenerated)?;

        let missing = record.request.unresolved_groups(selected, self_attested);
        if !missing.is_empty() {
            warn!("Proof {} cannot disclose {:?}", id, missing);
            return Err(Error::IncompleteDisclosure { missing });
        }
        let stray = stray_referents(&record.request, selected, self_attested);
        if !stray.is_empty() {
            return Err(Error::protocol(format!(
                "proof {} discloses groups that were not requested: {}",
                id,
                stray.join(", ")
            )));
        }

        let presentation = self
            .library
            .generate_proof(record.handle, selected, self_attested)
            .await?;
        if let Some(mut entry) = self.records.get_mut(id) {
            entry.state = next;
            entry.selection = Some(selected.clone());
            entry.presentation = Some(presentation);
            entry.updated_at = Utc::now();
        }
        info!("Proof {} {} -> {}", id, record.state, next);
        Ok(next)
    }

    /// Send the generated proof over `connection_id`.
    pub async fn send(&self, id: &ProofId, connection_id: &ConnectionId) -> Result<ProverState> {
        let record = self.record(id)?;
        let next = record.state.transition(ProverEvent::PresentationSent)?;
        let connection = self.connections.handle(connection_id)?;
        self.library.send_proof(record.handle, connection).await?;
        if let Some(mut entry) = self.records.get_mut(id) {
            entry.state = next;
            entry.connection_id = Some(connection_id.clone());
            entry.updated_at = Utc::now();
        }
        info!("Proof {} sent on {} -> {}", id, connection_id, next);
        Ok(next)
    }

    /// Poll once for the verifier's answer. Before sending, and after the
    /// exchange has finished, this reports the current state.
    pub async fn update(&self, id: &ProofId, connection_id: &ConnectionId) -> Result<ProverState> {
        let record = self.record(id)?;
        if record.state != ProverState::PresentationSent {
            return Ok(record.state);
        }
        if record.connection_id.as_ref() != Some(connection_id) {
            return Err(Error::protocol(format!(
                "proof {} was not sent on connection {}",
                id, connection_id
            )));
        }
        let connection = self.connections.handle(connection_id)?;
        let Some(message) = self
            .library
            .poll_presentation(record.handle, connection)
            .await?
        else {
            debug!("Proof {} has no verifier reply yet", id);
            return Ok(record.state);
        };

        let (next, failure) = match message {
            PresentationMessage::Ack => (record.state.transition(ProverEvent::AckReceived)?, None),
            PresentationMessage::ProblemReport(reason) => {
                warn!("Proof {} rejected by verifier: {}", id, reason);
                (record.state.transition(ProverEvent::Rejected)?, Some(reason))
            }
        };
        if let Some(mut entry) = self.records.get_mut(id) {
            entry.state = next;
            entry.failure = failure;
            entry.updated_at = Utc::now();
        }
        info!("Proof {} {} -> {}", id, record.state, next);
        Ok(next)
    }

    pub fn state(&self, id: &ProofId) -> Result<ProverState> {
        Ok(self.record(id)?.state)
    }

    pub fn record(&self, id: &ProofId) -> Result<ProofRecord> {
        self.records
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::not_found(format!("proof {}", id)))
    }

    pub fn records(&self) -> Vec<ProofRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

async fn select(
    referent: &str,
    candidates: &[CredentialCandidate],
    resolver: Option<&dyn TailsResolver>,
    cache: &mut TailsCache,
) -> Result<Option<SelectedCredential>> {
    let Some(candidate) = candidates.first() else {
        return Ok(None);
    };
    let tails = match &candidate.cred_info.rev_reg_id {
        None => None,
        Some(rev_reg_id) => {
            let Some(resolver) = resolver else {
                return Err(Error::MissingResolver {
                    referent: referent.to_string(),
                    rev_reg_id: rev_reg_id.clone(),
                });
            };
            if let Some(artifact) = cache.get(rev_reg_id) {
                Some(artifact.clone())
            } else {
                let artifact = resolver.resolve(rev_reg_id).await?;
                debug!("{} resolved tails for {} via {}", referent, rev_reg_id, resolver.name());
                cache.insert(rev_reg_id.clone(), artifact.clone());
                Some(artifact)
            }
        }
    };
    Ok(Some(SelectedCredential {
        credential: candidate.clone(),
        tails,
    }))
}

/// Referents supplied for groups the request never asked for, or
/// self-attested for groups that only accept a credential.
fn stray_referents(
    request: &ProofRequest,
    selected: &SelectedCredentials,
    self_attested: &SelfAttested,
) -> Vec<String> {
    let attrs = selected
        .attrs
        .keys()
        .filter(|r| !request.requested_attributes.contains_key(*r));
    let predicates = selected
        .predicates
        .keys()
        .filter(|r| !request.requested_predicates.contains_key(*r));
    let attested = self_attested.keys().filter(|r| {
        request
            .requested_attributes
            .get(*r)
            .map_or(true, |attr| !attr.is_self_attestable())
    });
    attrs.chain(predicates).chain(attested).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ariesagent_core::CredentialInfo;
    use ariesagent_vcx::{AlwaysFail, CacheBacked};

    fn request() -> ProofRequest {
        ProofRequest::parse(
            r#"{
                "nonce": "42",
                "requested_attributes": {
                    "attribute_0": { "name": "name", "restrictions": [{ "issuer_did": "V4SG" }] },
                    "attribute_3": { "name": "last_name" }
                },
                "requested_predicates": {
                    "predicate_0": { "name": "age", "p_type": ">=", "p_value": 20 }
                }
            }"#,
        )
        .unwrap()
    }

    fn candidate(rev_reg_id: Option<&str>) -> CredentialCandidate {
        CredentialCandidate {
            cred_info: CredentialInfo {
                referent: "cred-1".into(),
                attrs: BTreeMap::new(),
                schema_id: "schema".into(),
                cred_def_id: "V4SG:3:CL:1:tag".into(),
                rev_reg_id: rev_reg_id.map(String::from),
                cred_rev_id: rev_reg_id.map(|_| "1".to_string()),
            },
            interval: None,
        }
    }

    #[test]
    fn stray_referents_are_reported() {
        let req = request();
        let mut selected = SelectedCredentials::default();
        selected.attrs.insert(
            "attribute_9".into(),
            SelectedCredential {
                credential: candidate(None),
                tails: None,
            },
        );
        let mut attested = SelfAttested::new();
        attested.insert("attribute_3".into(), "Smith".into());
        attested.insert("attribute_0".into(), "Alice".into());
        assert_eq!(
            stray_referents(&req, &selected, &attested),
            vec!["attribute_9".to_string(), "attribute_0".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_group_selects_nothing() {
        let mut cache = TailsCache::new();
        let chosen = select("attribute_3", &[], None, &mut cache).await.unwrap();
        assert!(chosen.is_none());
    }

    #[tokio::test]
    async fn revocable_candidate_without_resolver_fails() {
        let mut cache = TailsCache::new();
        let err = select("attribute_0", &[candidate(Some("reg-1"))], None, &mut cache)
            .await
            .unwrap_err();
        match err {
            Error::MissingResolver { referent, rev_reg_id } => {
                assert_eq!(referent, "attribute_0");
                assert_eq!(rev_reg_id, "reg-1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn resolver_errors_propagate() {
        let mut cache = TailsCache::new();
        let resolver = AlwaysFail::default();
        let err = select("attribute_0", &[candidate(Some("reg-1"))], Some(&resolver), &mut cache)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TailsResolution { .. }));
    }

    #[tokio::test]
    async fn tails_are_resolved_once_per_registry() {
        let resolver = CacheBacked::new();
        resolver.insert(TailsArtifact {
            rev_reg_id: "reg-1".into(),
            location: "/tails/reg-1".into(),
            hash: "h".into(),
        });
        let mut cache = TailsCache::new();
        let first = select("attribute_0", &[candidate(Some("reg-1"))], Some(&resolver), &mut cache)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.tails.as_ref().map(|t| t.location.as_str()), Some("/tails/reg-1"));
        assert_eq!(cache.len(), 1);

        let plain = select("predicate_0", &[candidate(None)], None, &mut cache)
            .await
            .unwrap()
            .unwrap();
        assert!(plain.tails.is_none());
    }
}
