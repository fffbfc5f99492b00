//! The running client's configuration objects.

use mpclient_core::secrets::{BlobSource, HostError, SourceKind};
use mpclient_core::{ProtectionContext, Row, SecretBlob, SecretOrigin};

use super::parse_policy_secret;

/// Secret-bearing classes and the properties holding their secrets.
pub const SECRET_CLASSES: &[(&str, SecretOrigin, &[&str])] = &[
    (
        "CCM_NetworkAccessAccount",
        SecretOrigin::NetworkAccessAccount,
        &["NetworkAccessUsername", "NetworkAccessPassword"],
    ),
    ("CCM_TaskSequence", SecretOrigin::TaskSequence, &["TS_Sequence"]),
    ("CCM_CollectionVariable", SecretOrigin::CollectionVariable, &["Value"]),
];

/// Instances of the client's local policy classes.
pub trait LocalObjects {
    /// Every instance of `class` in the client's actual configuration.
    ///
    /// # Errors
    ///
    /// Fails if the configuration store cannot be queried.
    fn instances(&self, class: &str) -> Result<Vec<Row>, HostError>;
}

/// Reads blobs from the live configuration objects.
pub struct LiveStore<'a, O: LocalObjects + ?Sized> {
    objects: &'a O,
}

impl<'a, O: LocalObjects + ?Sized> LiveStore<'a, O> {
    pub fn new(objects: &'a O) -> Self {
        Self { objects }
    }
}

impl<O: LocalObjects + ?Sized> BlobSource for LiveStore<'_, O> {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn read_blobs(&self) -> Result<Vec<SecretBlob>, HostError> {
        let mut blobs = Vec::new();
        for &(class, origin, properties) in SECRET_CLASSES {
            let instances = self.objects.instances(class)?;
            tracing::debug!(class, instances = instances.len(), "read configuration objects");
            for row in &instances {
                for &property in properties {
                    let Some(value) = row.get(property) else {
                        continue;
                    };
                    match parse_policy_secret(value.as_bytes()) {
                        Ok(ciphertext) => blobs.push(SecretBlob {
                            name: blob_name(row, origin, property),
                            context: ProtectionContext::Machine,
                            origin,
                            ciphertext,
                        }),
                        Err(e) => {
                            tracing::warn!(class, property, error = %e, "skipping unreadable secret");
                        }
                    }
                }
            }
        }
        Ok(blobs)
    }
}

/// Collection variables are named by their `Name` property.
fn blob_name(row: &Row, origin: SecretOrigin, property: &str) -> String {
    match (origin, row.get("Name")) {
        (SecretOrigin::CollectionVariable, Some(name)) => name.to_string(),
        _ => property.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Objects(HashMap<&'static str, Vec<Row>>);

    impl LocalObjects for Objects {
        fn instances(&self, class: &str) -> Result<Vec<Row>, HostError> {
            Ok(self.0.get(class).cloned().unwrap_or_default())
        }
    }

    fn secret(hex: &str) -> String {
        format!(r#"<PolicySecret Version="1"><![CDATA[{hex}]]></PolicySecret>"#)
    }

    #[test]
    fn every_secret_property_is_read() {
        let mut objects = Objects::default();
        objects.0.insert(
            "CCM_NetworkAccessAccount",
            vec![Row::new()
                .with("NetworkAccessUsername", secret("0a01"))
                .with("NetworkAccessPassword", secret("0a02"))],
        );
        objects.0.insert(
            "CCM_CollectionVariable",
            vec![
                Row::new().with("Name", "OSDJoinPassword").with("Value", secret("0c01")),
                Row::new().with("Name", "Broken").with("Value", "plain text"),
            ],
        );

        let blobs = LiveStore::new(&objects).read_blobs().unwrap();
        let names: Vec<_> = blobs.iter().map(|b| (b.name.as_str(), b.origin)).collect();
        assert_eq!(
            names,
            [
                ("NetworkAccessUsername", SecretOrigin::NetworkAccessAccount),
                ("NetworkAccessPassword", SecretOrigin::NetworkAccessAccount),
                ("OSDJoinPassword", SecretOrigin::CollectionVariable),
            ]
        );
        assert_eq!(blobs[2].ciphertext, [0x0c, 0x01]);
    }

    struct Unavailable;

    impl LocalObjects for Unavailable {
        fn instances(&self, _class: &str) -> Result<Vec<Row>, HostError> {
            Err("namespace not found".into())
        }
    }

    #[test]
    fn query_failure_fails_the_read() {
        let store = LiveStore::new(&Unavailable);
        assert_eq!(store.kind(), SourceKind::Live);
        assert_eq!(store.read_blobs().unwrap_err().to_string(), "namespace not found");
    }
}
