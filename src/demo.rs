//! End-to-end Alice run against the simulated Faber peer

use crate::alice::Alice;
use crate::facade::AgentSnapshot;
use ariesagent_core::{
    AgentConfig, ConnectionState, CredentialOffer, Error, HolderState, MessageStatus, ProverState,
    Result, RevocationMetadata, TailsArtifact,
};
use ariesagent_vcx::{CacheBacked, InMemoryVcx, TailsResolver};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use tracing::info;

pub const FABER_INVITATION_ID: &str = "faber-invitation-1";
pub const REV_REG_ID: &str = "V4SG:4:V4SG:3:CL:12:faber:CL_ACCUM:tag1";

const FABER_INVITATION: &str = r#"{
    "@id": "faber-invitation-1",
    "label": "Faber College",
    "recipientKeys": ["6MHQpHaMXJA3K1yS8Gf5E5xCmSMAgDsgswKiRU5VqSDR"],
    "serviceEndpoint": "http://localhost:8080/agency/msg"
}"#;

pub const PROOF_REQUEST: &str = r#"{
    "nonce": "123432421212",
    "name": "proof-from-alice",
    "version": "1.0",
    "requested_attributes": {
        "attribute_0": { "name": "name", "restrictions": [{ "issuer_did": "V4SG" }] },
        "attribute_1": { "name": "degree", "restrictions": [{ "issuer_did": "V4SG" }] },
        "attribute_3": { "name": "last_name" }
    },
    "requested_predicates": {
        "predicate_0": { "name": "age", "p_type": ">=", "p_value": 20 }
    }
}"#;

pub fn degree_offer() -> CredentialOffer {
    CredentialOffer {
        thread_id: "faber-degree-1".into(),
        schema_id: "V4SG:2:FaberVcx:1.0".into(),
        cred_def_id: "V4SG:3:CL:12:faber".into(),
        comment: Some("Bachelor of maths".into()),
        attributes: [
            ("name", "alice"),
            ("date", "05-2018"),
            ("degree", "maths"),
            ("age", "25"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    }
}

pub fn revocation_metadata() -> RevocationMetadata {
    RevocationMetadata {
        rev_reg_id: REV_REG_ID.into(),
        tails_location: "/tmp/faber/tails/V4SG_4_V4SG_3_CL_12_faber_CL_ACCUM_tag1".into(),
        tails_hash: "7b8f3a4d2c1e0f9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c4d3e2f1a0b9c8d7e6f5a".into(),
    }
}

/// Connect, receive a degree, present a proof and exercise the auxiliary
/// channel operations. Faber is played by `InMemoryVcx`.
pub async fn run(config: AgentConfig, revocable: bool) -> Result<AgentSnapshot> {
    let faber = Arc::new(InMemoryVcx::new());
    let alice = Alice::with_config(faber.clone(), config)?;

    alice.accept_invite(FABER_INVITATION).await?;
    faber.peer_respond(FABER_INVITATION_ID).await?;
    alice.update_connection(ConnectionState::Responded).await?;
    faber.peer_ack(FABER_INVITATION_ID).await?;
    alice.update_connection(ConnectionState::Completed).await?;

    let offer = degree_offer();
    if revocable {
        faber.register_revocation_registry(revocation_metadata()).await;
    }
    faber
        .peer_offer_credential(FABER_INVITATION_ID, offer.clone())
        .await?;
    alice.accept_credential_offer().await?;
    alice.update_state_credential(HolderState::RequestSent).await?;
    faber
        .peer_issue_credential(
            FABER_INVITATION_ID,
            &offer.thread_id,
            revocable.then_some(REV_REG_ID),
        )
        .await?;
    alice
        .update_state_credential(HolderState::CredentialReceived)
        .await?;
    if revocable {
        info!(
            "Tails at {} ({})",
            alice.tails_location().await?,
            alice.tails_hash().await?
        );
    }

    let data = STANDARD.encode("Hello Faber");
    let signature = alice.sign_data(&data).await?;
    let raw_signature = STANDARD
        .decode(&signature)
        .map_err(|e| Error::protocol(e.to_string()))?;
    if !faber
        .peer_verify(FABER_INVITATION_ID, b"Hello Faber", &raw_signature)
        .await?
    {
        return Err(Error::protocol("Faber rejected Alice's signature"));
    }
    alice.send_message("Hello Faber, this is Alice").await?;
    alice.send_ping().await?;
    let features = alice.discover_their_features().await?;
    info!(
        "Faber speaks present-proof: {}",
        features.supports("https://didcomm.org/present-proof/")
    );
    faber
        .peer_queue_message(FABER_INVITATION_ID, MessageStatus::Received, "Welcome to Faber")
        .await?;
    let messages = alice.download_received_messages().await?;
    info!("Alice downloaded {} messages", messages.len());

    let tails = CacheBacked::new();
    let metadata = revocation_metadata();
    tails.insert(TailsArtifact {
        rev_reg_id: metadata.rev_reg_id,
        location: metadata.tails_location,
        hash: metadata.tails_hash,
    });
    let resolver: Option<&dyn TailsResolver> = if revocable { Some(&tails) } else { None };
    alice.send_holder_proof(PROOF_REQUEST, resolver).await?;
    faber.peer_ack_presentation(FABER_INVITATION_ID).await?;
    alice
        .update_state_holder_proof(ProverState::PresentationAckReceived)
        .await?;

    let stats = faber.context_stats();
    info!(
        "Demo finished: {} sessions opened, {} released",
        stats.opened, stats.closed
    );
    Ok(alice.facade().snapshot())
}
