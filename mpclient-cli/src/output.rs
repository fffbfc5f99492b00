//! Artifact files written under `--output`.

use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OutputError {
    #[error("failed to write {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {name}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Writes policy documents and summaries into one directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// # Errors
    ///
    /// I/O error creating `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| OutputError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store a raw policy body as `policy-<id>-<version>.xml`.
    ///
    /// # Errors
    ///
    /// I/O error writing the file.
    pub fn write_policy(&self, policy_id: &str, version: &str, body: &[u8]) -> Result<PathBuf, OutputError> {
        let name = format!("policy-{}-{}.xml", file_safe(policy_id), file_safe(version));
        self.write(&name, body)
    }

    /// Store `value` as pretty JSON in `name`.
    ///
    /// # Errors
    ///
    /// Encoding or I/O failure.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, OutputError> {
        let json = serde_json::to_vec_pretty(value).map_err(|source| OutputError::Encode {
            name: name.to_string(),
            source,
        })?;
        self.write(name, &json)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, OutputError> {
        let path = self.dir.join(name);
        std::fs::write(&path, bytes).map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote artifact");
        Ok(path)
    }
}

/// Keep ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`.
fn file_safe(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}
