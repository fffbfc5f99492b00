//! Local secret recovery from both sources, through a recording host.

use std::collections::HashMap;
use std::path::Path;

use mpclient_cli::local::{
    list_protected, recover_secrets, tactic, LiveStore, LocalObjects, RepositoryFile,
};
use mpclient_cli::recovered::SecretValue;
use mpclient_cli::{ClientError, ErrorKind};
use mpclient_core::secrets::testing::{MapProtector, RecordingHost};
use mpclient_core::secrets::{ElevationTactic, HostError, Privileges, SourceKind};
use mpclient_core::{ProtectionContext, Row, SecretError, SecretOrigin};

const USERNAME_CT: &[u8] = &[0x01, 0x00, 0x00, 0x00, 0xd0, 0x8c, 0x9d, 0xdf, 0x01];
const PASSWORD_CT: &[u8] = &[0x01, 0x00, 0x00, 0x00, 0xd0, 0x8c, 0x9d, 0xdf, 0x02];
const OLD_PASSWORD_CT: &[u8] = &[0x01, 0x00, 0x00, 0x00, 0xd0, 0x8c, 0x9d, 0xdf, 0x03];
const VARIABLE_CT: &[u8] = &[0x01, 0x00, 0x00, 0x00, 0xd0, 0x8c, 0x9d, 0xdf, 0x04];

fn policy_secret(ciphertext: &[u8]) -> String {
    format!(
        r#"<PolicySecret Version="1"><![CDATA[{}]]></PolicySecret>"#,
        hex::encode_upper(ciphertext)
    )
}

/// A repository holding the current account, a stale copy with the old
/// password, and one collection variable.
fn write_repository(dir: &Path) -> RepositoryFile {
    let mut bytes = vec![0x00; 64];
    for (class, secrets) in [
        ("CCM_NetworkAccessAccount", vec![USERNAME_CT, OLD_PASSWORD_CT]),
        ("CCM_NetworkAccessAccount", vec![USERNAME_CT, PASSWORD_CT]),
        ("CCM_CollectionVariable", vec![VARIABLE_CT]),
    ] {
        bytes.extend_from_slice(class.as_bytes());
        bytes.extend_from_slice(&[0x00, 0x03, 0x9c, 0x00]);
        for ciphertext in secrets {
            bytes.extend_from_slice(policy_secret(ciphertext).as_bytes());
            bytes.extend_from_slice(&[0x00; 7]);
        }
    }
    let path = dir.join("OBJECTS.DATA");
    std::fs::write(&path, bytes).unwrap();
    RepositoryFile::new(path)
}

fn protector() -> MapProtector {
    let mut protector = MapProtector::default();
    protector.insert(USERNAME_CT, ProtectionContext::Machine, b"CORP\\svc_naa");
    protector.insert(PASSWORD_CT, ProtectionContext::Machine, b"Winter2024!");
    protector.insert(OLD_PASSWORD_CT, ProtectionContext::Machine, b"Autumn2023!");
    protector.insert(VARIABLE_CT, ProtectionContext::Machine, b"P@ssw0rd");
    protector
}

#[derive(Default)]
struct ConfigObjects(HashMap<&'static str, Vec<Row>>);

impl LocalObjects for ConfigObjects {
    fn instances(&self, class: &str) -> Result<Vec<Row>, HostError> {
        Ok(self.0.get(class).cloned().unwrap_or_default())
    }
}

fn live_objects() -> ConfigObjects {
    let mut objects = ConfigObjects::default();
    objects.0.insert(
        "CCM_NetworkAccessAccount",
        vec![Row::new()
            .with("NetworkAccessUsername", policy_secret(USERNAME_CT))
            .with("NetworkAccessPassword", policy_secret(PASSWORD_CT))],
    );
    objects.0.insert(
        "CCM_CollectionVariable",
        vec![Row::new()
            .with("Name", "OSDJoinPassword")
            .with("Value", policy_secret(VARIABLE_CT))],
    );
    objects
}

fn text(value: &str) -> SecretValue {
    SecretValue::Text {
        value: value.to_string(),
    }
}

#[test]
fn disk_method_recovers_rotated_secrets_and_restores_the_acl() {
    let dir = tempfile::tempdir().unwrap();
    let repository = write_repository(dir.path());
    let host = RecordingHost::new(Privileges::Administrator);

    let report = recover_secrets(&host, &protector(), &repository, tactic(false)).unwrap();

    assert_eq!(report.method, SourceKind::OnDisk);
    assert_eq!(report.privileges, Privileges::Administrator);
    assert_eq!(report.elevation, Some(ElevationTactic::AclRelaxation));
    let secrets: Vec<_> = report
        .recovered
        .secrets
        .iter()
        .map(|s| (s.name.as_str(), s.origin, s.value.clone()))
        .collect();
    assert_eq!(
        secrets,
        [
            ("NetworkAccessUsername", SecretOrigin::NetworkAccessAccount, text("CORP\\svc_naa")),
            ("NetworkAccessPassword", SecretOrigin::NetworkAccessAccount, text("Autumn2023!")),
            ("NetworkAccessPassword", SecretOrigin::NetworkAccessAccount, text("Winter2024!")),
            ("Value", SecretOrigin::CollectionVariable, text("P@ssw0rd")),
        ]
    );
    assert!(report.recovered.failures.is_empty());

    assert!(!host.acl_relaxed());
    assert!(!host.impersonating());
    assert_eq!(host.events(), ["relax-acl", "restore-acl"]);
}

#[test]
fn live_method_with_token_duplication_reverts_impersonation() {
    let objects = live_objects();
    let host = RecordingHost::new(Privileges::Administrator);

    let report = recover_secrets(&host, &protector(), &LiveStore::new(&objects), tactic(true)).unwrap();

    assert_eq!(report.method, SourceKind::Live);
    assert_eq!(report.elevation, Some(ElevationTactic::TokenDuplication));
    let names: Vec<_> = report.recovered.secrets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["NetworkAccessUsername", "NetworkAccessPassword", "OSDJoinPassword"]);
    assert_eq!(report.recovered.secrets[1].value, text("Winter2024!"));

    assert!(!host.impersonating());
    assert!(!host.acl_relaxed());
    assert_eq!(host.events(), ["impersonate", "revert"]);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["method"], "live");
    assert_eq!(json["elevation"], "token-duplication");
    assert_eq!(json["secrets"][2]["value"], "P@ssw0rd");
}

#[test]
fn undecryptable_blob_is_listed_and_state_restored() {
    let objects = live_objects();
    let host = RecordingHost::new(Privileges::Administrator);
    let mut protector = MapProtector::default();
    protector.insert(USERNAME_CT, ProtectionContext::Machine, b"CORP\\svc_naa");

    let report = recover_secrets(&host, &protector, &LiveStore::new(&objects), tactic(false)).unwrap();

    assert_eq!(report.recovered.secrets.len(), 1);
    let failed: Vec<_> = report.recovered.failures.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(failed, ["NetworkAccessPassword", "OSDJoinPassword"]);
    assert!(!host.acl_relaxed());
}

#[test]
fn standard_user_is_refused_before_touching_the_host() {
    let dir = tempfile::tempdir().unwrap();
    let repository = write_repository(dir.path());
    let host = RecordingHost::new(Privileges::Standard);

    let err = recover_secrets(&host, &protector(), &repository, tactic(true)).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientPrivilege);
    assert!(host.events().is_empty());
}

#[test]
fn system_process_needs_no_elevation() {
    let dir = tempfile::tempdir().unwrap();
    let repository = write_repository(dir.path());
    let host = RecordingHost::new(Privileges::System);

    let report = recover_secrets(&host, &protector(), &repository, tactic(false)).unwrap();

    assert_eq!(report.elevation, None);
    assert_eq!(report.recovered.secrets.len(), 4);
    assert!(host.events().is_empty());
}

#[test]
fn missing_repository_still_restores_the_acl() {
    let dir = tempfile::tempdir().unwrap();
    let repository = RepositoryFile::new(dir.path().join("absent.data"));
    let host = RecordingHost::new(Privileges::Administrator);

    let err = recover_secrets(&host, &protector(), &repository, tactic(false)).unwrap_err();

    assert!(matches!(err, ClientError::Secret(SecretError::Source(_))));
    assert!(!host.acl_relaxed());
    assert_eq!(host.events(), ["relax-acl", "restore-acl"]);
}

#[test]
fn failed_release_is_an_error_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let repository = write_repository(dir.path());
    let host = RecordingHost::new(Privileges::Administrator).fail_release();

    let err = recover_secrets(&host, &protector(), &repository, tactic(false)).unwrap_err();

    assert!(matches!(
        err,
        ClientError::Secret(SecretError::Release {
            tactic: ElevationTactic::AclRelaxation,
            ..
        })
    ));
    assert_eq!(host.events(), ["relax-acl", "restore-acl-failed"]);
}

#[test]
fn ciphertext_only_lists_every_stored_blob() {
    let dir = tempfile::tempdir().unwrap();
    let repository = write_repository(dir.path());

    let protected = list_protected(&repository).unwrap();

    let listed: Vec<_> = protected
        .iter()
        .map(|p| (p.name.as_str(), p.ciphertext.clone()))
        .collect();
    assert_eq!(
        listed,
        [
            ("NetworkAccessUsername", hex::encode(USERNAME_CT)),
            ("NetworkAccessPassword", hex::encode(OLD_PASSWORD_CT)),
            ("NetworkAccessPassword", hex::encode(PASSWORD_CT)),
            ("Value", hex::encode(VARIABLE_CT)),
        ]
    );
}
