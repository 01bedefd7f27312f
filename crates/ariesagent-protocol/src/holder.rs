//! Credential issuance, holder side
//!
//! The only bounded wait in the agent lives here: waiting for an offer polls
//! the connection on the configured interval until an offer shows up or the
//! timeout elapses. Everything else polls once and returns.

use crate::connection::ConnectionService;
use ariesagent_core::{
    ConnectionHandle, ConnectionId, CredentialHandle, CredentialId, CredentialMessage, CredentialOffer, Error,
    HolderEvent, HolderState, IssuedCredential, PollPolicy, Result, RevocationMetadata,
};
use ariesagent_vcx::VcxLibrary;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Serialize)]
pub struct HolderRecord {
    pub id: CredentialId,
    pub connection_id: ConnectionId,
    pub handle: CredentialHandle,
    pub offer: CredentialOffer,
    pub state: HolderState,
    pub credential: Option<IssuedCredential>,
    pub revocation: Option<RevocationMetadata>,
    pub failure: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub struct HolderService {
    library: Arc<dyn VcxLibrary>,
    connections: Arc<ConnectionService>,
    records: DashMap<CredentialId, HolderRecord>,
    poll: PollPolicy,
}

impl HolderService {
    pub fn new(library: Arc<dyn VcxLibrary>, connections: Arc<ConnectionService>, poll: PollPolicy) -> Self {
        Self {
            library,
            connections,
            records: DashMap::new(),
            poll,
        }
    }

    /// Wait (bounded by the poll policy) for an offer on `connection_id`,
    /// accept it and send the credential request.
    pub async fn wait_for_offer_and_accept(
        &self,
        connection_id: &ConnectionId,
        credential_id: &CredentialId,
    ) -> Result<HolderState> {
        if self.records.contains_key(credential_id) {
            return Err(Error::protocol(format!("credential {} already exists", credential_id)));
        }
        let connection = self.connections.handle(connection_id)?;
        let offer = self.wait_for_offer(connection_id, connection).await?;

        let received = HolderState::Initial.transition(HolderEvent::OfferReceived)?;
        info!(
            "Credential {} received offer {} ({}) on {}",
            credential_id, offer.thread_id, offer.cred_def_id, connection_id
        );
        let handle = self.library.send_credential_request(connection, &offer).await?;
        let state = received.transition(HolderEvent::RequestSent)?;

        self.records.insert(
            credential_id.clone(),
            HolderRecord {
                id: credential_id.clone(),
                connection_id: connection_id.clone(),
                handle,
                offer,
                state,
                credential: None,
                revocation: None,
                failure: None,
                updated_at: Utc::now(),
            },
        );
        info!("Credential {} -> {}", credential_id, state);
        Ok(state)
    }

    async fn wait_for_offer(
        &self,
        connection_id: &ConnectionId,
        connection: ConnectionHandle,
    ) -> Result<CredentialOffer> {
        let poll = async {
            loop {
                let offers = self.library.poll_credential_offers(connection).await?;
                if let Some(offer) = offers.into_iter().next() {
                    return Ok::<_, Error>(offer);
                }
                debug!("No credential offer on {} yet", connection_id);
                tokio::time::sleep(self.poll.interval()).await;
            }
        };
        match tokio::time::timeout(self.poll.offer_timeout(), poll).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: format!("credential offer on {}", connection_id),
                waited_ms: self.poll.offer_timeout_ms,
            }),
        }
    }

    /// Poll for issuance progress once. Unknown ids report `Initial`.
    pub async fn update(&self, credential_id: &CredentialId, connection_id: &ConnectionId) -> Result<HolderState> {
        let Some(record) = self.records.get(credential_id).map(|r| r.clone()) else {
            debug!("Credential {} has no record yet", credential_id);
            return Ok(HolderState::Initial);
        };
        if &record.connection_id != connection_id {
            return Err(Error::protocol(format!(
                "credential {} belongs to connection {}, not {}",
                credential_id, record.connection_id, connection_id
            )));
        }
        if record.state.is_terminal() {
            return Ok(record.state);
        }
        let connection = self.connections.handle(connection_id)?;
        let Some(message) = self.library.poll_credential(record.handle, connection).await? else {
            return Ok(record.state);
        };

        match message {
            CredentialMessage::Issued(credential) => {
                let revocation = match &credential.rev_reg_id {
                    Some(rev_reg_id) => match self.library.revocation_registry(rev_reg_id).await {
                        Ok(metadata) => Some(metadata),
                        Err(e) => {
                            warn!("Credential {} revocation registry {}: {}", credential_id, rev_reg_id, e);
                            return self.fail(credential_id, record.state, e.to_string());
                        }
                    },
                    None => None,
                };
                let next = record.state.transition(HolderEvent::CredentialIssued)?;
                if let Err(e) = self.library.store_credential(record.handle, &credential).await {
                    warn!("Credential {} could not be stored: {}", credential_id, e);
                    return self.fail(credential_id, record.state, e.to_string());
                }
                if let Some(mut entry) = self.records.get_mut(credential_id) {
                    entry.state = next;
                    entry.credential = Some(credential);
                    entry.revocation = revocation;
                    entry.updated_at = Utc::now();
                }
                info!("Credential {} {} -> {}", credential_id, record.state, next);
                Ok(next)
            }
            CredentialMessage::ProblemReport(reason) => {
                warn!("Credential {} rejected by issuer: {}", credential_id, reason);
                self.fail(credential_id, record.state, reason)
            }
        }
    }

    fn fail(&self, credential_id: &CredentialId, from: HolderState, reason: String) -> Result<HolderState> {
        let next = from.transition(HolderEvent::Failed)?;
        if let Some(mut entry) = self.records.get_mut(credential_id) {
            entry.state = next;
            entry.failure = Some(reason);
            entry.updated_at = Utc::now();
        }
        info!("Credential {} {} -> {}", credential_id, from, next);
        Ok(next)
    }

    pub fn state(&self, credential_id: &CredentialId) -> HolderState {
        self.records
            .get(credential_id)
            .map(|r| r.state)
            .unwrap_or(HolderState::Initial)
    }

    pub fn record(&self, credential_id: &CredentialId) -> Result<HolderRecord> {
        self.records
            .get(credential_id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::not_found(format!("credential {}", credential_id)))
    }

    pub fn records(&self) -> Vec<HolderRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn revocation(&self, credential_id: &CredentialId) -> Result<RevocationMetadata> {
        self.record(credential_id)?.revocation.ok_or_else(|| {
            Error::not_found(format!("revocation registry for credential {}", credential_id))
        })
    }

    pub fn rev_reg_id(&self, credential_id: &CredentialId) -> Result<String> {
        Ok(self.revocation(credential_id)?.rev_reg_id)
    }

    pub fn tails_location(&self, credential_id: &CredentialId) -> Result<String> {
        Ok(self.revocation(credential_id)?.tails_location)
    }

    pub fn tails_hash(&self, credential_id: &CredentialId) -> Result<String> {
        Ok(self.revocation(credential_id)?.tails_hash)
    }
}
