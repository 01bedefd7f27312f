//! Collaborator library trait

use ariesagent_core::{
    AgencyMessage, AgentConfig, ConnectionHandle, ConnectionMessage, CredentialHandle,
    CredentialMessage, CredentialOffer, FeatureSet, Invitation, IssuedCredential, MessageStatus, Presentation,
    PresentationMessage, ProofHandle, ProofRequest, Result, RetrievedCredentials,
    RevocationMetadata, SelectedCredentials, SelfAttested,
};

/// Wallet, transport and crypto operations the protocol machines depend on.
///
/// Polling methods report what arrived from the peer (`None` when nothing
/// did); deciding the resulting protocol state is the caller's job.
#[async_trait::async_trait]
pub trait VcxLibrary: Send + Sync {
    /// Initialise the native execution context for one operation.
    async fn open_context(&self, config: &AgentConfig) -> Result<()>;

    /// Tear down the native execution context. Must be safe to call after a
    /// partially failed `open_context`.
    fn close_context(&self);

    // -- connections --------------------------------------------------------

    async fn create_connection(&self, invitation: &Invitation) -> Result<ConnectionHandle>;

    async fn send_connection_request(&self, connection: ConnectionHandle) -> Result<()>;

    async fn poll_connection(&self, connection: ConnectionHandle)
        -> Result<Option<ConnectionMessage>>;

    async fn send_message(&self, connection: ConnectionHandle, message: &str) -> Result<()>;

    /// Sign with the connection's pairwise key.
    async fn sign_data(&self, connection: ConnectionHandle, data: &[u8]) -> Result<Vec<u8>>;

    async fn verify_signature(
        &self,
        connection: ConnectionHandle,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool>;

    async fn send_ping(&self, connection: ConnectionHandle, comment: Option<&str>) -> Result<()>;

    async fn discover_features(&self, connection: ConnectionHandle) -> Result<FeatureSet>;

    /// Queued agency messages whose status is in `statuses` (all when empty), oldest first.
    async fn fetch_messages(
        &self,
        connection: ConnectionHandle,
        statuses: &[MessageStatus],
    ) -> Result<Vec<AgencyMessage>>;

    // -- credential issuance (holder) ---------------------------------------

    async fn poll_credential_offers(&self, connection: ConnectionHandle)
        -> Result<Vec<CredentialOffer>>;

    async fn send_credential_request(
        &self,
        connection: ConnectionHandle,
        offer: &CredentialOffer,
    ) -> Result<CredentialHandle>;

    async fn poll_credential(
        &self,
        credential: CredentialHandle,
        connection: ConnectionHandle,
    ) -> Result<Option<CredentialMessage>>;

    /// Commit an accepted credential to the holder wallet. Polling alone
    /// never stores anything.
    async fn store_credential(
        &self,
        credential: CredentialHandle,
        issued: &IssuedCredential,
    ) -> Result<()>;

    async fn revocation_registry(&self, rev_reg_id: &str) -> Result<RevocationMetadata>;

    // -- proof presentation (prover) ----------------------------------------

    async fn create_proof(&self, request: &ProofRequest) -> Result<ProofHandle>;

    /// Wallet credentials that can satisfy each requested group.
    async fn retrieve_credentials(&self, proof: ProofHandle) -> Result<RetrievedCredentials>;

    async fn generate_proof(
        &self,
        proof: ProofHandle,
        selected: &SelectedCredentials,
        self_attested: &SelfAttested,
    ) -> Result<Presentation>;

    async fn send_proof(&self, proof: ProofHandle, connection: ConnectionHandle) -> Result<()>;

    async fn poll_presentation(
        &self,
        proof: ProofHandle,
        connection: ConnectionHandle,
    ) -> Result<Option<PresentationMessage>>;
}
