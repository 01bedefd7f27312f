//! Tests for ariesagent-core: identifiers, states, payloads, errors

use ariesagent_core::*;
use serde_json::json;

// ===========================================================================
// Record identifiers
// ===========================================================================

#[test]
fn record_id_new_and_display() {
    let id = CredentialId::new("credential-of-alice");
    assert_eq!(id.as_str(), "credential-of-alice");
    assert_eq!(format!("{}", id), "credential-of-alice");
}

#[test]
fn record_id_equality_and_hash() {
    use std::collections::HashSet;
    let a = ProofId::new("same");
    let b: ProofId = "same".into();
    let c: ProofId = String::from("other").into();
    assert_eq!(a, b);
    assert_ne!(a, c);
    let mut set = HashSet::new();
    set.insert(a.clone());
    assert!(set.contains(&b));
    assert!(!set.contains(&c));
}

#[test]
fn handles_display_their_kind() {
    assert_eq!(ConnectionHandle(7).to_string(), "ConnectionHandle#7");
    assert_eq!(ProofHandle(1).to_string(), "ProofHandle#1");
}

// ===========================================================================
// States
// ===========================================================================

#[test]
fn states_serialize_by_name() {
    assert_eq!(
        serde_json::to_string(&ConnectionState::Requested).unwrap(),
        r#""Requested""#
    );
    assert_eq!(
        serde_json::to_string(&ProverState::PresentationSent).unwrap(),
        r#""PresentationSent""#
    );
    let back: HolderState = serde_json::from_str(r#""CredentialReceived""#).unwrap();
    assert_eq!(back, HolderState::CredentialReceived);
}

#[test]
fn terminal_states() {
    assert!(ConnectionState::Completed.is_terminal());
    assert!(!ConnectionState::Responded.is_terminal());
    assert!(HolderState::Failed.is_terminal());
    assert!(HolderState::CredentialReceived.is_terminal());
    assert!(!HolderState::Initial.is_terminal());
    assert!(ProverState::PresentationAckReceived.is_terminal());
    assert!(!ProverState::ProofGenerated.is_terminal());
}

#[test]
fn connection_duplicate_response_is_idempotent() {
    let event = ConnectionEvent::Inbound(ConnectionMessage::Response);
    let once = ConnectionState::Requested.transition(&event).unwrap();
    let twice = once.transition(&event).unwrap();
    assert_eq!(once, twice);
}

// ===========================================================================
// Errors
// ===========================================================================

#[test]
fn error_display_messages() {
    let err = Error::IncompleteDisclosure {
        missing: vec!["attribute_1".into(), "predicate_0".into()],
    };
    assert_eq!(
        err.to_string(),
        "incomplete disclosure, unresolved groups: attribute_1, predicate_0"
    );

    let err = Error::MissingResolver {
        referent: "attribute_0".into(),
        rev_reg_id: "rev-1".into(),
    };
    assert!(err.to_string().contains("no resolver"));

    let err = Error::invalid_state("disclosed proof", ProverState::RequestReceived, "generate proof");
    assert_eq!(
        err.to_string(),
        "disclosed proof is in state RequestReceived, cannot generate proof"
    );
}

#[test]
fn session_acquisition_keeps_source() {
    use std::error::Error as _;
    let err = Error::session_acquisition(Error::library("open_context", "wallet locked"));
    assert!(err.is_session_failure());
    let source = err.source().expect("source");
    assert_eq!(source.to_string(), "library error: open_context - wallet locked");
}

#[test]
fn error_from_json() {
    let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
    let err: Error = json_err.into();
    assert!(matches!(err, Error::Json(_)));
}

#[test]
fn error_from_http_client() {
    let http_err = reqwest::Client::new().get("not a url").build().unwrap_err();
    let err: Error = http_err.into();
    match err {
        Error::Http(message) => assert!(!message.is_empty()),
        other => panic!("unexpected {:?}", other),
    }
}

// ===========================================================================
// Payloads
// ===========================================================================

#[test]
fn agency_message_wire_names() {
    let msg: AgencyMessage = serde_json::from_value(json!({
        "uid": "msg-1",
        "statusCode": "MS-103",
        "payload": "{\"content\":\"hello\"}",
        "senderDID": "did:sov:faber",
        "received_at": "2024-01-01T00:00:00Z"
    }))
    .unwrap();
    assert_eq!(msg.status_code, MessageStatus::Received);
    assert_eq!(msg.sender_did.as_deref(), Some("did:sov:faber"));
}

#[test]
fn feature_set_prefix_lookup() {
    let features = FeatureSet {
        protocols: vec![ProtocolDescriptor {
            pid: "https://didcomm.org/trust_ping/1.0".into(),
            roles: vec!["sender".into(), "receiver".into()],
        }],
    };
    assert!(features.supports("https://didcomm.org/trust_ping/"));
    assert!(!features.supports("https://didcomm.org/present-proof/"));
}
