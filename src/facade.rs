//! AgentFacade: one session scope per protocol operation
//!
//! Each public method opens the native context, runs exactly one protocol
//! call inside it and releases the context before returning, whatever the
//! outcome. Calls on one facade are expected to be serialized by the caller;
//! overlapping calls fail with `SessionBusy`.

use ariesagent_core::{
    AgencyMessage, AgentConfig, ConnectionId, ConnectionState, CredentialId, FeatureSet,
    HolderState, MessageStatus, ProofId, ProverState, Result, SelectedCredentials, SelfAttested,
};
use ariesagent_protocol::{
    ConnectionRecord, ConnectionService, HolderRecord, HolderService, ProofRecord, ProverService,
    SessionContext,
};
use ariesagent_vcx::{TailsResolver, VcxLibrary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{info_span, warn, Instrument, Span};

pub struct AgentFacade {
    config: Arc<AgentConfig>,
    session: SessionContext,
    connections: Arc<ConnectionService>,
    holder: HolderService,
    prover: ProverService,
}

/// Every protocol record the agent holds, for inspection.
#[derive(Debug, Serialize)]
pub struct AgentSnapshot {
    pub agent_name: String,
    pub taken_at: DateTime<Utc>,
    pub connections: Vec<ConnectionRecord>,
    pub credentials: Vec<HolderRecord>,
    pub proofs: Vec<ProofRecord>,
}

impl AgentSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl AgentFacade {
    pub fn new(library: Arc<dyn VcxLibrary>, config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let connections = Arc::new(ConnectionService::new(library.clone()));
        Ok(Self {
            session: SessionContext::new(library.clone(), config.clone()),
            holder: HolderService::new(library.clone(), connections.clone(), config.poll.clone()),
            prover: ProverService::new(library, connections.clone()),
            connections,
            config,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn is_session_active(&self) -> bool {
        self.session.is_active()
    }

    async fn scoped<T, F>(&self, span: Span, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = self.session.scoped(operation).instrument(span.clone()).await;
        if let Err(e) = &result {
            let _enter = span.enter();
            warn!("operation failed: {}", e);
        }
        result
    }

    // -- connections --------------------------------------------------------

    pub async fn accept_invitation(&self, id: &ConnectionId, invitation: &str) -> Result<ConnectionState> {
        let span = info_span!("accept_invitation", connection = %id);
        self.scoped(span, self.connections.accept_invitation(id, invitation))
            .await
    }

    pub async fn update_connection(&self, id: &ConnectionId) -> Result<ConnectionState> {
        let span = info_span!("update_connection", connection = %id);
        self.scoped(span, self.connections.update(id)).await
    }

    pub async fn connection_state(&self, id: &ConnectionId) -> Result<ConnectionState> {
        let span = info_span!("connection_state", connection = %id);
        self.scoped(span, async { self.connections.state(id) }).await
    }

    pub async fn sign_data(&self, id: &ConnectionId, data: &[u8]) -> Result<Vec<u8>> {
        let span = info_span!("sign_data", connection = %id, bytes = data.len());
        self.scoped(span, self.connections.sign_data(id, data)).await
    }

    pub async fn verify_signature(&self, id: &ConnectionId, data: &[u8], signature: &[u8]) -> Result<bool> {
        let span = info_span!("verify_signature", connection = %id);
        self.scoped(span, self.connections.verify_signature(id, data, signature))
            .await
    }

    pub async fn send_message(&self, id: &ConnectionId, message: &str) -> Result<()> {
        let span = info_span!("send_message", connection = %id);
        self.scoped(span, self.connections.send_message(id, message))
            .await
    }

    pub async fn send_ping(&self, id: &ConnectionId, comment: Option<&str>) -> Result<()> {
        let span = info_span!("send_ping", connection = %id);
        self.scoped(span, self.connections.send_ping(id, comment)).await
    }

    pub async fn discover_features(&self, id: &ConnectionId) -> Result<FeatureSet> {
        let span = info_span!("discover_features", connection = %id);
        self.scoped(span, self.connections.discover_features(id)).await
    }

    pub async fn fetch_messages(
        &self,
        id: &ConnectionId,
        statuses: &[MessageStatus],
    ) -> Result<Vec<AgencyMessage>> {
        let span = info_span!("fetch_messages", connection = %id, statuses = statuses.len());
        self.scoped(span, self.connections.fetch_messages(id, statuses))
            .await
    }

    // -- credential holder --------------------------------------------------

    pub async fn wait_for_offer_and_accept(
        &self,
        connection_id: &ConnectionId,
        credential_id: &CredentialId,
    ) -> Result<HolderState> {
        let span = info_span!(
            "wait_for_offer_and_accept",
            connection = %connection_id,
            credential = %credential_id
        );
        self.scoped(
            span,
            self.holder.wait_for_offer_and_accept(connection_id, credential_id),
        )
        .await
    }

    pub async fn update_credential(
        &self,
        credential_id: &CredentialId,
        connection_id: &ConnectionId,
    ) -> Result<HolderState> {
        let span = info_span!(
            "update_credential",
            credential = %credential_id,
            connection = %connection_id
        );
        self.scoped(span, self.holder.update(credential_id, connection_id))
            .await
    }

    pub async fn credential_state(&self, credential_id: &CredentialId) -> Result<HolderState> {
        let span = info_span!("credential_state", credential = %credential_id);
        self.scoped(span, async { Ok(self.holder.state(credential_id)) })
            .await
    }

    pub async fn tails_location(&self, credential_id: &CredentialId) -> Result<String> {
        let span = info_span!("tails_location", credential = %credential_id);
        self.scoped(span, async { self.holder.tails_location(credential_id) })
            .await
    }

    pub async fn tails_hash(&self, credential_id: &CredentialId) -> Result<String> {
        let span = info_span!("tails_hash", credential = %credential_id);
        self.scoped(span, async { self.holder.tails_hash(credential_id) })
            .await
    }

    pub async fn rev_reg_id(&self, credential_id: &CredentialId) -> Result<String> {
        let span = info_span!("rev_reg_id", credential = %credential_id);
        self.scoped(span, async { self.holder.rev_reg_id(credential_id) })
            .await
    }

    // -- disclosed proof ----------------------------------------------------

    pub async fn build_proof(&self, proof_id: &ProofId, request: &str) -> Result<ProverState> {
        let span = info_span!("build_proof", proof = %proof_id);
        self.scoped(span, self.prover.build(proof_id, request)).await
    }

    pub async fn select_credentials(
        &self,
        proof_id: &ProofId,
        resolver: Option<&dyn TailsResolver>,
    ) -> Result<SelectedCredentials> {
        let span = info_span!(
            "select_credentials",
            proof = %proof_id,
            resolver = resolver.map(|r| r.name()).unwrap_or("none")
        );
        self.scoped(span, self.prover.select_credentials(proof_id, resolver))
            .await
    }

    pub async fn generate_proof(
        &self,
        proof_id: &ProofId,
        selected: &SelectedCredentials,
        self_attested: &SelfAttested,
    ) -> Result<ProverState> {
        let span = info_span!("generate_proof", proof = %proof_id);
        self.scoped(
            span,
            self.prover.generate_proof(proof_id, selected, self_attested),
        )
        .await
    }

    pub async fn send_proof(&self, proof_id: &ProofId, connection_id: &ConnectionId) -> Result<ProverState> {
        let span = info_span!("send_proof", proof = %proof_id, connection = %connection_id);
        self.scoped(span, self.prover.send(proof_id, connection_id)).await
    }

    pub async fn update_proof(&self, proof_id: &ProofId, connection_id: &ConnectionId) -> Result<ProverState> {
        let span = info_span!("update_proof", proof = %proof_id, connection = %connection_id);
        self.scoped(span, self.prover.update(proof_id, connection_id))
            .await
    }

    pub async fn proof_state(&self, proof_id: &ProofId) -> Result<ProverState> {
        let span = info_span!("proof_state", proof = %proof_id);
        self.scoped(span, async { self.prover.state(proof_id) }).await
    }

    /// Local records only; no native context is needed.
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            agent_name: self.config.agent_name.clone(),
            taken_at: Utc::now(),
            connections: self.connections.records(),
            credentials: self.holder.records(),
            proofs: self.prover.records(),
        }
    }
}
