//! In-memory host facilities.
//!
//! `RecordingHost` tracks whether the ACL is relaxed or a token is being
//! impersonated, so tests can assert the host ends up where it started.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use zeroize::Zeroizing;

use super::blob::{ProtectionContext, SecretBlob};
use super::host::{
    AclGrant, BlobSource, DataProtection, HostError, HostSecurity, ImpersonationToken, Privileges,
    SourceKind,
};

const ORIGINAL_DESCRIPTOR: &str = "O:SYG:SYD:(A;;KA;;;SY)";

#[derive(Debug, Default)]
struct HostState {
    acl_relaxed: bool,
    impersonating: bool,
    events: Vec<&'static str>,
}

/// A host that records every security-state change.
#[derive(Debug)]
pub struct RecordingHost {
    privileges: Privileges,
    fail_acquire: bool,
    fail_release: bool,
    state: Mutex<HostState>,
}

impl RecordingHost {
    #[must_use]
    pub fn new(privileges: Privileges) -> Self {
        Self {
            privileges,
            fail_acquire: false,
            fail_release: false,
            state: Mutex::new(HostState::default()),
        }
    }

    /// Make relax/impersonate fail without changing anything.
    #[must_use]
    pub fn fail_acquire(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    /// Make restore/revert fail. The state stays modified and the attempt is
    /// recorded as `restore-acl-failed` or `revert-failed`.
    #[must_use]
    pub fn fail_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    #[must_use]
    pub fn acl_relaxed(&self) -> bool {
        self.state().acl_relaxed
    }

    #[must_use]
    pub fn impersonating(&self) -> bool {
        self.state().impersonating
    }

    #[must_use]
    pub fn events(&self) -> Vec<&'static str> {
        self.state().events.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HostState> {
        // A panicking test body must not hide the state from the assertions after it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HostSecurity for RecordingHost {
    fn privileges(&self) -> Privileges {
        self.privileges
    }

    fn relax_secret_acl(&self) -> Result<AclGrant, HostError> {
        if self.fail_acquire {
            return Err("access denied changing ACL".into());
        }
        let mut state = self.state();
        state.acl_relaxed = true;
        state.events.push("relax-acl");
        Ok(AclGrant {
            location: "SECURITY\\Policy\\Secrets".to_string(),
            original_descriptor: ORIGINAL_DESCRIPTOR.to_string(),
        })
    }

    fn restore_secret_acl(&self, grant: AclGrant) -> Result<(), HostError> {
        if self.fail_release {
            self.state().events.push("restore-acl-failed");
            return Err("access denied restoring ACL".into());
        }
        if grant.original_descriptor != ORIGINAL_DESCRIPTOR {
            return Err("grant does not match the relaxed ACL".into());
        }
        let mut state = self.state();
        state.acl_relaxed = false;
        state.events.push("restore-acl");
        Ok(())
    }

    fn impersonate_system(&self) -> Result<ImpersonationToken, HostError> {
        if self.fail_acquire {
            return Err("no system process available".into());
        }
        let mut state = self.state();
        state.impersonating = true;
        state.events.push("impersonate");
        Ok(ImpersonationToken {
            source_process: 4,
            handle: 0x1f0,
        })
    }

    fn revert_impersonation(&self, _token: ImpersonationToken) -> Result<(), HostError> {
        if self.fail_release {
            self.state().events.push("revert-failed");
            return Err("revert failed".into());
        }
        let mut state = self.state();
        state.impersonating = false;
        state.events.push("revert");
        Ok(())
    }
}

/// Data protection backed by a ciphertext → plaintext table.
#[derive(Debug, Default)]
pub struct MapProtector {
    entries: HashMap<Vec<u8>, (ProtectionContext, Vec<u8>)>,
}

impl MapProtector {
    pub fn insert(&mut self, ciphertext: &[u8], context: ProtectionContext, plaintext: &[u8]) {
        self.entries
            .insert(ciphertext.to_vec(), (context, plaintext.to_vec()));
    }
}

impl DataProtection for MapProtector {
    fn unprotect(
        &self,
        ciphertext: &[u8],
        context: ProtectionContext,
    ) -> Result<Zeroizing<Vec<u8>>, HostError> {
        match self.entries.get(ciphertext) {
            Some((expected, plaintext)) if *expected == context => {
                Ok(Zeroizing::new(plaintext.clone()))
            }
            Some(_) => Err("blob protected under a different context".into()),
            None => Err("the data is invalid".into()),
        }
    }
}

/// A fixed set of blobs.
#[derive(Debug)]
pub struct StaticSource {
    kind: SourceKind,
    blobs: Vec<SecretBlob>,
    fail: bool,
    reads: AtomicUsize,
}

impl StaticSource {
    #[must_use]
    pub fn new(kind: SourceKind, blobs: Vec<SecretBlob>) -> Self {
        Self {
            kind,
            blobs,
            fail: false,
            reads: AtomicUsize::new(0),
        }
    }

    /// Make every read fail.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl BlobSource for StaticSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn read_blobs(&self) -> Result<Vec<SecretBlob>, HostError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err("store unavailable".into());
        }
        Ok(self.blobs.clone())
    }
}
