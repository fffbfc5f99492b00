//! Policy resolution and secret recovery against a mock management point.

mod common;

use std::collections::HashMap;

use common::*;
use mpclient_auth::{ClientIdentity, PrivateKey};
use mpclient_cli::commands::policy::{collect_secrets, decrypt_into, decrypt_secrets, SUMMARY_FILE};
use mpclient_cli::output::ArtifactWriter;
use mpclient_cli::recovered::SecretValue;
use mpclient_cli::resolver::{PolicyResolver, PolicyTarget, ResolveError};
use mpclient_cli::transport::TransportError;
use mpclient_core::secrets::testing::MapProtector;
use mpclient_core::{
    CodecError, MessageType, NetworkAccessCredential, ProtectionContext, ResourceKind,
    SecretOrigin,
};

const NAA_CIPHERTEXT: &[u8] = &[0x01, 0x00, 0x00, 0x00, 0xd0, 0x8c, 0x9d, 0xdf, 0x01, 0x15];

fn machine_target() -> PolicyTarget {
    PolicyTarget {
        kind: ResourceKind::Machine,
        client_name: "WS01".to_string(),
        fqdn: "ws01.corp.example".to_string(),
        user_sid: None,
    }
}

fn naa_config() -> MockConfig {
    let mut bodies = HashMap::new();
    bodies.insert(
        "policy/naa1".to_string(),
        naa_credential_policy("NAA1", NAA_CIPHERTEXT),
    );
    bodies.insert(
        "policy/app1".to_string(),
        br#"<Policy ID="APP1" Version="1"><Instance Class="SoftwareDistribution"/></Policy>"#.to_vec(),
    );
    MockConfig {
        assignments: vec![
            assignment("NAA1", "policy/naa1", "secret,mandatory"),
            assignment("APP1", "policy/app1", "mandatory"),
        ],
        bodies,
        ..MockConfig::default()
    }
}

#[tokio::test]
async fn network_access_account_is_recovered() {
    let mp = MockManagementPoint::start_with(naa_config()).await;
    let session = mp.session();
    let identity = ClientIdentity::create().unwrap();

    let (report, resolved) = collect_secrets(&session, &identity, &machine_target(), false, None)
        .await
        .unwrap();

    assert_eq!(report.assignments.len(), 2);
    assert_eq!(resolved.bodies.len(), 2);
    assert!(report.failures.is_empty());
    assert_eq!(report.secrets.len(), 1);
    let secret = &report.secrets[0];
    assert_eq!(secret.policy_id, "NAA1");
    assert_eq!(secret.origin, SecretOrigin::NetworkAccessAccount);
    assert_eq!(secret.context, ProtectionContext::Machine);
    assert_eq!(secret.ciphertext, hex::encode(NAA_CIPHERTEXT));

    let mut protector = MapProtector::default();
    protector.insert(NAA_CIPHERTEXT, ProtectionContext::Machine, b"CORP\\svc_naa\0Winter2024!");
    let outcomes = decrypt_secrets(&resolved, &protector);
    assert_eq!(outcomes.len(), 1);
    let decrypted = outcomes[0].result.as_ref().unwrap();
    let credential = NetworkAccessCredential::from_plaintext(decrypted.plaintext()).unwrap();
    assert_eq!(credential.username, "CORP\\svc_naa");
    assert_eq!(credential.password.as_str(), "Winter2024!");

    // One policy request, then one body request per assignment.
    assert_eq!(mp.requests_of(MessageType::PolicyRequest).len(), 1);
    assert_eq!(mp.requests_of(MessageType::PolicyBodyRequest).len(), 2);
    assert!(mp.requests().iter().all(|r| r.signature_valid));
}

#[tokio::test]
async fn undecryptable_secret_fails_alone() {
    let mut config = naa_config();
    config.bodies.insert(
        "policy/naa1".to_string(),
        naa_policy("NAA1", NAA_CIPHERTEXT, &[0xaa, 0xbb]),
    );
    let mp = MockManagementPoint::start_with(config).await;
    let session = mp.session();
    let identity = ClientIdentity::create().unwrap();

    let (_, resolved) = collect_secrets(&session, &identity, &machine_target(), false, None)
        .await
        .unwrap();

    let mut protector = MapProtector::default();
    protector.insert(NAA_CIPHERTEXT, ProtectionContext::Machine, b"svc_naa");
    let outcomes = decrypt_secrets(&resolved, &protector);

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_ok());
    assert_eq!(outcomes[1].name, "NetworkAccessPassword");
    assert!(!outcomes[1].is_ok());
}

#[tokio::test]
async fn decrypted_report_carries_the_credential() {
    let mut config = naa_config();
    config.bodies.insert(
        "policy/naa1".to_string(),
        naa_policy("NAA1", NAA_CIPHERTEXT, &[0xaa, 0xbb]),
    );
    let mp = MockManagementPoint::start_with(config).await;
    let session = mp.session();
    let identity = ClientIdentity::create().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let writer = ArtifactWriter::open(dir.path()).unwrap();

    let (mut report, resolved) =
        collect_secrets(&session, &identity, &machine_target(), false, Some(&writer))
            .await
            .unwrap();
    assert!(report.decrypted.is_none());

    let mut protector = MapProtector::default();
    protector.insert(NAA_CIPHERTEXT, ProtectionContext::Machine, b"CORP\\svc_naa\0Winter2024!");
    decrypt_into(&mut report, &resolved, &protector);

    let decrypted = report.decrypted.as_ref().unwrap();
    assert_eq!(decrypted.secrets.len(), 1);
    assert_eq!(decrypted.secrets[0].name, "NetworkAccessUsername");
    assert_eq!(
        decrypted.secrets[0].value,
        SecretValue::Credential {
            username: "CORP\\svc_naa".to_string(),
            password: "Winter2024!".to_string(),
        }
    );
    assert_eq!(decrypted.failures.len(), 1);
    assert_eq!(decrypted.failures[0].name, "NetworkAccessPassword");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["decrypted"]["secrets"][0]["password"], "Winter2024!");

    // The summary on disk was written before decryption and holds no plaintext.
    let summary = std::fs::read_to_string(writer.dir().join(SUMMARY_FILE)).unwrap();
    assert!(!summary.contains("Winter2024!"));
}

#[tokio::test]
async fn only_flagged_skips_plain_assignments() {
    let mp = MockManagementPoint::start_with(naa_config()).await;
    let session = mp.session();
    let identity = ClientIdentity::create().unwrap();

    let (report, resolved) = collect_secrets(&session, &identity, &machine_target(), true, None)
        .await
        .unwrap();

    assert_eq!(report.assignments.len(), 2);
    assert_eq!(resolved.bodies.len(), 1);
    assert_eq!(resolved.bodies[0].assignment.id, "NAA1");
    assert_eq!(mp.requests_of(MessageType::PolicyBodyRequest).len(), 1);
}

#[tokio::test]
async fn missing_body_is_recorded_and_the_rest_continue() {
    let mut config = naa_config();
    config
        .assignments
        .insert(0, assignment("GONE", "policy/gone", "secret"));
    let mp = MockManagementPoint::start_with(config).await;
    let session = mp.session();
    let identity = ClientIdentity::create().unwrap();

    let (report, resolved) = collect_secrets(&session, &identity, &machine_target(), false, None)
        .await
        .unwrap();

    assert_eq!(resolved.bodies.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].policy_id, "GONE");
    assert!(matches!(
        resolved.failures[0].error,
        ResolveError::Transport(TransportError::Codec(CodecError::ServerRejected { status: 404, .. }))
    ));
    assert_eq!(report.secrets.len(), 1);
}

#[tokio::test]
async fn signed_bodies_are_verified() {
    let server_key = PrivateKey::generate();
    let mut config = naa_config();
    config.body_key = Some(PrivateKey::from_pkcs8_der(&server_key.to_pkcs8_der().unwrap()).unwrap());
    let mp = MockManagementPoint::start_with(config).await;
    let identity = ClientIdentity::create().unwrap();

    let session = mp.session_pinning_bodies(server_key.public_key());
    let (report, _) = collect_secrets(&session, &identity, &machine_target(), false, None)
        .await
        .unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.secrets.len(), 1);

    // A different pinned key rejects every body.
    let session = mp.session_pinning_bodies(PrivateKey::generate().public_key());
    let (report, resolved) = collect_secrets(&session, &identity, &machine_target(), false, None)
        .await
        .unwrap();
    assert!(report.secrets.is_empty());
    assert_eq!(resolved.failures.len(), 2);
    assert!(resolved
        .failures
        .iter()
        .all(|f| matches!(f.error, ResolveError::Codec(CodecError::Signing(_)))));
}

#[tokio::test]
async fn unsigned_body_is_refused_when_a_key_is_pinned() {
    let mp = MockManagementPoint::start_with(naa_config()).await;
    let identity = ClientIdentity::create().unwrap();
    let session = mp.session_pinning_bodies(PrivateKey::generate().public_key());

    let resolver = PolicyResolver::new(
        &session.transport,
        session.destination(),
        session.settings.policy_signing_key.clone(),
    );
    let assignments = resolver
        .request_assignments(&identity, &machine_target())
        .await
        .unwrap();
    let err = resolver
        .fetch_body(&assignments[0], &identity)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Codec(CodecError::UnsignedBody)));
}

#[tokio::test]
async fn user_policy_request_names_the_user() {
    let mp = MockManagementPoint::start_with(naa_config()).await;
    let session = mp.session();
    let identity = ClientIdentity::create().unwrap();
    let target = PolicyTarget {
        kind: ResourceKind::User,
        user_sid: Some("S-1-5-21-1004336348-1177238915-682003330-1001".to_string()),
        ..machine_target()
    };

    let (report, _) = collect_secrets(&session, &identity, &target, true, None)
        .await
        .unwrap();
    assert_eq!(report.assignments.len(), 2);

    let request = &mp.requests_of(MessageType::PolicyRequest)[0];
    let body = String::from_utf8(request.body.clone()).unwrap();
    assert!(body.contains(&format!(r#"ResourceType="{}""#, ResourceKind::User.wire_name())));
    assert!(body.contains("S-1-5-21-1004336348-1177238915-682003330-1001"));
}

#[tokio::test]
async fn artifacts_are_written() {
    let mp = MockManagementPoint::start_with(naa_config()).await;
    let session = mp.session();
    let identity = ClientIdentity::create().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let writer = ArtifactWriter::open(dir.path().join("loot")).unwrap();

    let (report, _) = collect_secrets(&session, &identity, &machine_target(), false, Some(&writer))
        .await
        .unwrap();

    assert_eq!(report.artifacts.len(), 3);
    for path in &report.artifacts {
        assert!(path.exists(), "{} missing", path.display());
    }
    let body = std::fs::read(writer.dir().join("policy-NAA1-1.xml")).unwrap();
    assert_eq!(body, naa_credential_policy("NAA1", NAA_CIPHERTEXT));

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(writer.dir().join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(summary["client_id"], identity.token().to_string());
    assert_eq!(summary["secrets"][0]["policy_id"], "NAA1");
}
