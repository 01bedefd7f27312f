//! Tests for ariesagent-vcx: tails resolvers and the in-memory library

use ariesagent_core::*;
use ariesagent_vcx::tails::sha256_hex;
use ariesagent_vcx::*;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const REV_REG_ID: &str = "V4SG:4:V4SG:3:CL:12:tag:CL_ACCUM:tag1";

async fn open(vcx: &InMemoryVcx) {
    vcx.open_context(&AgentConfig::default()).await.unwrap();
}

/// Serve `/tails/<id>` for one registry id on an ephemeral port.
async fn tails_server(body: &'static [u8], hits: Arc<AtomicUsize>) -> String {
    let app = Router::new().route(
        "/tails/:id",
        get(move |Path(id): Path<String>| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                if id == REV_REG_ID {
                    (StatusCode::OK, body.to_vec())
                } else {
                    (StatusCode::NOT_FOUND, Vec::new())
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/tails/", addr)
}

// ===========================================================================
// CacheBacked
// ===========================================================================

#[tokio::test]
async fn cache_returns_registered_artifact() {
    let cache = CacheBacked::new();
    assert!(cache.is_empty());
    cache.insert(TailsArtifact {
        rev_reg_id: REV_REG_ID.into(),
        location: "/var/tails/abc".into(),
        hash: "abc".into(),
    });
    let artifact = cache.resolve(REV_REG_ID).await.unwrap();
    assert_eq!(artifact.location, "/var/tails/abc");
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn cache_miss_is_resolution_error() {
    let cache = CacheBacked::new();
    let err = cache.resolve("unknown").await.unwrap_err();
    assert!(matches!(err, Error::TailsResolution { .. }));
}

#[tokio::test]
async fn cache_reads_tails_files_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join(tails_file_name(REV_REG_ID));
    std::fs::write(&file, b"tails-bytes").unwrap();

    let cache = CacheBacked::with_dir(dir.path());
    let artifact = cache.resolve(REV_REG_ID).await.unwrap();
    assert_eq!(artifact.location, file.display().to_string());
    assert_eq!(artifact.hash, sha256_hex(b"tails-bytes"));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn similar_registry_ids_do_not_share_tails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(tails_file_name("reg_1")), b"registry one").unwrap();

    let cache = CacheBacked::with_dir(dir.path());
    let artifact = cache.resolve("reg_1").await.unwrap();
    assert_eq!(artifact.hash, sha256_hex(b"registry one"));
    let err = cache.resolve("reg:1").await.unwrap_err();
    assert!(matches!(err, Error::TailsResolution { .. }));
}

// ===========================================================================
// RemoteFetch
// ===========================================================================

#[tokio::test]
async fn remote_fetch_downloads_once_then_uses_cache() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = tails_server(b"remote-tails", hits.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let remote = RemoteFetch::new(&base, dir.path()).unwrap();

    let first = remote.resolve(REV_REG_ID).await.unwrap();
    assert_eq!(first.hash, sha256_hex(b"remote-tails"));
    assert_eq!(std::fs::read(&first.location).unwrap(), b"remote-tails");

    let second = remote.resolve(REV_REG_ID).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remote_fetch_reports_http_failures() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = tails_server(b"unused", hits).await;
    let dir = tempfile::tempdir().unwrap();
    let remote = RemoteFetch::new(&base, dir.path()).unwrap();
    let err = remote.resolve("other-registry").await.unwrap_err();
    match err {
        Error::TailsResolution { reason, .. } => assert!(reason.contains("404")),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn remote_fetch_rejects_bad_base_url() {
    assert!(matches!(
        RemoteFetch::new("not a url", "/tmp"),
        Err(Error::Config(_))
    ));
}

// ===========================================================================
// InMemoryVcx
// ===========================================================================

#[tokio::test]
async fn connection_messages_are_delivered_in_order() {
    let vcx = InMemoryVcx::new();
    open(&vcx).await;
    let handle = vcx
        .create_connection(&Invitation::parse(r#"{"id":"abc"}"#).unwrap())
        .await
        .unwrap();
    assert_eq!(vcx.poll_connection(handle).await.unwrap(), None);

    vcx.peer_respond("abc").await.unwrap();
    vcx.peer_ack("abc").await.unwrap();
    assert_eq!(
        vcx.poll_connection(handle).await.unwrap(),
        Some(ConnectionMessage::Response)
    );
    assert_eq!(
        vcx.poll_connection(handle).await.unwrap(),
        Some(ConnectionMessage::Ack)
    );
    assert_eq!(vcx.poll_connection(handle).await.unwrap(), None);
}

#[tokio::test]
async fn signatures_verify_for_the_peer() {
    let vcx = InMemoryVcx::new();
    open(&vcx).await;
    let handle = vcx
        .create_connection(&Invitation::parse(r#"{"id":"abc"}"#).unwrap())
        .await
        .unwrap();
    let signature = vcx.sign_data(handle, b"hello").await.unwrap();
    assert_eq!(signature.len(), 64);
    assert!(vcx.peer_verify("abc", b"hello", &signature).await.unwrap());
    assert!(vcx.verify_signature(handle, b"hello", &signature).await.unwrap());
    assert!(!vcx.verify_signature(handle, b"tampered", &signature).await.unwrap());
}

#[tokio::test]
async fn fetch_messages_filters_by_status() {
    let vcx = InMemoryVcx::new();
    open(&vcx).await;
    let handle = vcx
        .create_connection(&Invitation::parse(r#"{"id":"abc"}"#).unwrap())
        .await
        .unwrap();
    vcx.peer_queue_message("abc", MessageStatus::Received, "one").await.unwrap();
    vcx.peer_queue_message("abc", MessageStatus::Reviewed, "two").await.unwrap();
    vcx.peer_queue_message("abc", MessageStatus::Received, "three").await.unwrap();

    let received = vcx
        .fetch_messages(handle, &[MessageStatus::Received])
        .await
        .unwrap();
    let payloads: Vec<_> = received.iter().map(|m| m.payload.as_str()).collect();
    assert_eq!(payloads, vec!["one", "three"]);
    assert_eq!(vcx.fetch_messages(handle, &[]).await.unwrap().len(), 3);
}

#[tokio::test]
async fn retrieve_credentials_applies_restrictions_and_predicates() {
    let vcx = InMemoryVcx::new();
    open(&vcx).await;
    vcx.add_wallet_credential(CredentialInfo {
        referent: "cred-1".into(),
        attrs: [("name", "alice"), ("age", "25")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        schema_id: "V4SG:2:FaberVcx:1.0".into(),
        cred_def_id: "V4SG:3:CL:12:tag".into(),
        rev_reg_id: None,
        cred_rev_id: None,
    })
    .await;
    let request = ProofRequest::parse(
        r#"{
            "nonce": "1",
            "requested_attributes": {
                "attribute_0": { "name": "name", "restrictions": [{ "issuer_did": "V4SG" }] },
                "attribute_1": { "name": "name", "restrictions": [{ "issuer_did": "OTHER" }] }
            },
            "requested_predicates": {
                "predicate_0": { "name": "age", "p_type": ">=", "p_value": 20 },
                "predicate_1": { "name": "age", "p_type": ">=", "p_value": 30 }
            }
        }"#,
    )
    .unwrap();
    let proof = vcx.create_proof(&request).await.unwrap();
    let retrieved = vcx.retrieve_credentials(proof).await.unwrap();
    assert_eq!(retrieved.attrs["attribute_0"].len(), 1);
    assert!(retrieved.attrs["attribute_1"].is_empty());
    assert_eq!(retrieved.predicates["predicate_0"].len(), 1);
    assert!(retrieved.predicates["predicate_1"].is_empty());
}

#[tokio::test]
async fn issued_credential_lands_in_wallet() {
    let vcx = InMemoryVcx::new();
    open(&vcx).await;
    let connection = vcx
        .create_connection(&Invitation::parse(r#"{"id":"abc"}"#).unwrap())
        .await
        .unwrap();
    let offer = CredentialOffer {
        thread_id: "thread-1".into(),
        schema_id: "schema".into(),
        cred_def_id: "V4SG:3:CL:12:tag".into(),
        comment: None,
        attributes: [("name".to_string(), "alice".to_string())].into_iter().collect(),
    };
    vcx.peer_offer_credential("abc", offer.clone()).await.unwrap();
    assert_eq!(vcx.poll_credential_offers(connection).await.unwrap(), vec![offer.clone()]);

    let credential = vcx.send_credential_request(connection, &offer).await.unwrap();
    assert!(vcx.poll_credential_offers(connection).await.unwrap().is_empty());
    assert_eq!(vcx.poll_credential(credential, connection).await.unwrap(), None);

    vcx.peer_issue_credential("abc", "thread-1", None).await.unwrap();
    let message = vcx.poll_credential(credential, connection).await.unwrap();
    let Some(CredentialMessage::Issued(issued)) = message else {
        panic!("expected an issued credential, got {:?}", message);
    };
    assert!(vcx.wallet_credentials().await.is_empty());

    vcx.store_credential(credential, &issued).await.unwrap();
    vcx.store_credential(credential, &issued).await.unwrap();
    assert_eq!(vcx.wallet_credentials().await.len(), 1);
    assert!(vcx
        .outbound("abc")
        .await
        .contains(&OutboundMessage::CredentialRequest {
            thread_id: "thread-1".into()
        }));
}
