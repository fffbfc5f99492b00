//! On-disk identity key store.
//!
//! One pair of files per identity, named by key fingerprint:
//! - `<fingerprint>.key`: PKCS#8 DER private key, mode 0600 on unix
//! - `<fingerprint>.cert`: DER certificate

use std::path::{Path, PathBuf};

use mpclient_auth::{ClientIdentity, Fingerprint, KeySource, PrivateKey};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("could not determine the data directory")]
    NoDataDir,

    #[error("key store I/O failed at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored key {path} is not a valid PKCS#8 Ed25519 key")]
    CorruptKey { path: PathBuf },

    #[error("failed to encode private key")]
    Encode(#[source] mpclient_auth::KeyError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Directory of stored identities.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Open the platform default store (`<data dir>/identity`).
    ///
    /// # Errors
    ///
    /// `StoreError::NoDataDir` or an I/O error creating the directory.
    pub fn open_default() -> Result<Self, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "mpclient", "mpclient")
            .ok_or(StoreError::NoDataDir)?;
        Self::open(dirs.data_dir().join("identity"))
    }

    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// I/O error creating the directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.key", fingerprint.to_hex()))
    }

    fn cert_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.cert", fingerprint.to_hex()))
    }

    /// Persist the key and certificate of `identity`.
    ///
    /// # Errors
    ///
    /// `StoreError::Encode` or an I/O error.
    pub fn save(&self, identity: &ClientIdentity) -> Result<(), StoreError> {
        let fingerprint = identity.fingerprint();
        let key_der = identity
            .private_key()
            .to_pkcs8_der()
            .map_err(StoreError::Encode)?;

        let key_path = self.key_path(fingerprint);
        write_private(&key_path, &key_der)?;

        let cert_path = self.cert_path(fingerprint);
        std::fs::write(&cert_path, identity.certificate_der()).map_err(io_error(&cert_path))?;

        tracing::debug!(fingerprint = %fingerprint, dir = %self.dir.display(), "stored identity");
        Ok(())
    }

    /// Load a stored private key.
    ///
    /// # Errors
    ///
    /// `StoreError::CorruptKey` if the file exists but does not decode, or an
    /// I/O error other than not-found.
    pub fn load_key(&self, fingerprint: &Fingerprint) -> Result<Option<PrivateKey>, StoreError> {
        let path = self.key_path(fingerprint);
        let der = match std::fs::read(&path) {
            Ok(der) => zeroize::Zeroizing::new(der),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        PrivateKey::from_pkcs8_der(&der)
            .map(Some)
            .map_err(|_| StoreError::CorruptKey { path })
    }

    /// Load a stored certificate.
    ///
    /// # Errors
    ///
    /// I/O error other than not-found.
    pub fn load_certificate(&self, fingerprint: &Fingerprint) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.cert_path(fingerprint);
        match std::fs::read(&path) {
            Ok(der) => Ok(Some(der)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Fingerprints of every stored key, sorted.
    ///
    /// # Errors
    ///
    /// I/O error reading the directory.
    pub fn list(&self) -> Result<Vec<Fingerprint>, StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(io_error(&self.dir))?;
        let mut fingerprints = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_error(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("key") {
                continue;
            }
            if let Some(fp) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| Fingerprint::parse(s).ok())
            {
                fingerprints.push(fp);
            }
        }
        fingerprints.sort_by_key(Fingerprint::to_hex);
        Ok(fingerprints)
    }
}

impl KeySource for KeyStore {
    fn private_key_for(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<PrivateKey>, Box<dyn std::error::Error + Send + Sync>> {
        self.load_key(fingerprint).map_err(Into::into)
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(io_error(path))?;
        file.write_all(bytes).map_err(io_error(path))?;
    }
    #[cfg(not(unix))]
    std::fs::write(path, bytes).map_err(io_error(path))?;

    Ok(())
}
