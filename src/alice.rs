//! Alice: the scripted invitee
//!
//! Drives one connection, one held credential and one disclosed proof under
//! fixed ids. State-advancing steps take the state the caller expects and
//! fail with `UnexpectedState` when the agent ends up elsewhere.

use crate::facade::AgentFacade;
use ariesagent_core::{
    AgencyMessage, AgentConfig, ConnectionId, ConnectionState, CredentialId, Error, FeatureSet,
    HolderState, MessageStatus, ProofId, ProverState, Result, SelfAttested,
};
use ariesagent_vcx::{AlwaysFail, TailsResolver, VcxLibrary};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};

pub const CONNECTION_ID: &str = "connection-alice-to-faber";
pub const CREDENTIAL_ID: &str = "credential-of-alice";
pub const PROOF_ID: &str = "proof-from-alice";

/// Port of the local notification server webhooks point at.
pub const WEBHOOK_PORT: u16 = 7209;

pub struct Alice {
    facade: AgentFacade,
    connection_id: ConnectionId,
    credential_id: CredentialId,
    proof_id: ProofId,
}

fn expect_state<S: PartialEq + Display>(expected: S, actual: S) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::unexpected_state(expected, actual))
    }
}

/// Values Alice attests herself when a request leaves them open.
pub fn self_attested() -> SelfAttested {
    let mut attested = SelfAttested::new();
    attested.insert("attribute_3".to_string(), "Smith".to_string());
    attested
}

impl Alice {
    /// Alice with a fresh timestamped agent name and the local webhook.
    pub fn new(library: Arc<dyn VcxLibrary>) -> Result<Self> {
        let config = AgentConfig {
            agent_name: format!("alice-{}", chrono::Utc::now().timestamp()),
            ..Default::default()
        }
        .with_local_webhook(WEBHOOK_PORT);
        Self::with_config(library, config)
    }

    pub fn with_config(library: Arc<dyn VcxLibrary>, config: AgentConfig) -> Result<Self> {
        Ok(Self {
            facade: AgentFacade::new(library, config)?,
            connection_id: ConnectionId::new(CONNECTION_ID),
            credential_id: CredentialId::new(CREDENTIAL_ID),
            proof_id: ProofId::new(PROOF_ID),
        })
    }

    pub fn facade(&self) -> &AgentFacade {
        &self.facade
    }

    pub async fn accept_invite(&self, invite: &str) -> Result<()> {
        info!("Alice establishing connection with Faber using invite {}", invite);
        let state = self
            .facade
            .accept_invitation(&self.connection_id, invite)
            .await?;
        expect_state(ConnectionState::Requested, state)
    }

    pub async fn update_connection(&self, expected: ConnectionState) -> Result<()> {
        info!("Alice updating connection, expecting {}", expected);
        let state = self.facade.update_connection(&self.connection_id).await?;
        expect_state(expected, state)
    }

    pub async fn accept_credential_offer(&self) -> Result<()> {
        info!("Alice accepting credential offer");
        self.facade
            .wait_for_offer_and_accept(&self.connection_id, &self.credential_id)
            .await?;
        Ok(())
    }

    pub async fn update_state_credential(&self, expected: HolderState) -> Result<()> {
        info!("Alice updating credential, expecting {}", expected);
        let state = self
            .facade
            .update_credential(&self.credential_id, &self.connection_id)
            .await?;
        expect_state(expected, state)
    }

    /// Build, select, generate and send a proof for `request`.
    ///
    /// Without a resolver, any revocable match fails the selection.
    pub async fn send_holder_proof(&self, request: &str, resolver: Option<&dyn TailsResolver>) -> Result<()> {
        let fallback = AlwaysFail::default();
        let resolver = resolver.unwrap_or(&fallback);

        self.facade.build_proof(&self.proof_id, request).await?;
        let selected = self
            .facade
            .select_credentials(&self.proof_id, Some(resolver))
            .await?;
        self.facade
            .generate_proof(&self.proof_id, &selected, &self_attested())
            .await?;
        let state = self
            .facade
            .send_proof(&self.proof_id, &self.connection_id)
            .await?;
        expect_state(ProverState::PresentationSent, state)
    }

    pub async fn update_state_holder_proof(&self, expected: ProverState) -> Result<()> {
        info!("Alice updating disclosed proof, expecting {}", expected);
        let state = self
            .facade
            .update_proof(&self.proof_id, &self.connection_id)
            .await?;
        expect_state(expected, state)
    }

    /// Sign base64 data with the connection key; the signature is base64 too.
    pub async fn sign_data(&self, data_base64: &str) -> Result<String> {
        let data = STANDARD
            .decode(data_base64)
            .map_err(|e| Error::protocol(format!("data is not base64: {}", e)))?;
        let signature = self.facade.sign_data(&self.connection_id, &data).await?;
        let signature_base64 = STANDARD.encode(signature);
        debug!("Alice signed data. Data={} signature={}", data_base64, signature_base64);
        Ok(signature_base64)
    }

    pub async fn verify_signature(&self, data_base64: &str, signature_base64: &str) -> Result<bool> {
        let decode = |label: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| Error::protocol(format!("{} is not base64: {}", label, e)))
        };
        let data = decode("data", data_base64)?;
        let signature = decode("signature", signature_base64)?;
        self.facade
            .verify_signature(&self.connection_id, &data, &signature)
            .await
    }

    pub async fn send_message(&self, message: &str) -> Result<()> {
        info!("Alice sending message");
        self.facade.send_message(&self.connection_id, message).await
    }

    pub async fn tails_location(&self) -> Result<String> {
        let location = self.facade.tails_location(&self.credential_id).await?;
        debug!("Alice obtained tails location {}", location);
        Ok(location)
    }

    pub async fn tails_hash(&self) -> Result<String> {
        let hash = self.facade.tails_hash(&self.credential_id).await?;
        debug!("Alice obtained tails hash {}", hash);
        Ok(hash)
    }

    /// Messages the agency holds for the connection with status `MS-103`.
    pub async fn download_received_messages(&self) -> Result<Vec<AgencyMessage>> {
        self.facade
            .fetch_messages(&self.connection_id, &[MessageStatus::Received])
            .await
    }

    pub async fn send_ping(&self) -> Result<()> {
        info!("Alice sending ping");
        self.facade.send_ping(&self.connection_id, None).await
    }

    pub async fn discover_their_features(&self) -> Result<FeatureSet> {
        info!("Alice requesting Faber's features");
        let features = self.facade.discover_features(&self.connection_id).await?;
        info!("Faber supports {} protocols", features.protocols.len());
        Ok(features)
    }
}
