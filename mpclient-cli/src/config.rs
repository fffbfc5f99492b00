//! Operator configuration.
//!
//! Read from `config.toml` in the platform config directory (or `--config`),
//! then overridden by `MPCLIENT_*` environment variables, then by CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mpclient_auth::{Fingerprint, PublicKey};
use mpclient_core::MessageType;
use serde::{Deserialize, Serialize};

pub const ENV_MANAGEMENT_POINT: &str = "MPCLIENT_MANAGEMENT_POINT";
pub const ENV_SITE_CODE: &str = "MPCLIENT_SITE_CODE";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config at {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no {0} configured (set it in config.toml, the environment, or with a flag)")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// HTTP scheme used to reach the management point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Request path for each message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointTable {
    pub registration: String,
    pub discovery: String,
    pub policy: String,
    pub policy_body: String,
    pub content_location: String,
    /// Object-query endpoint used by `wait-member`.
    pub query: String,
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self {
            registration: "/mp/registration".to_string(),
            discovery: "/mp/discovery".to_string(),
            policy: "/mp/policy".to_string(),
            policy_body: "/mp/policy-body".to_string(),
            content_location: "/mp/content-location".to_string(),
            query: "/mp/query".to_string(),
        }
    }
}

impl EndpointTable {
    #[must_use]
    pub fn path_for(&self, message_type: MessageType) -> &str {
        match message_type {
            MessageType::Registration => &self.registration,
            MessageType::DiscoveryRecord => &self.discovery,
            MessageType::PolicyRequest => &self.policy,
            MessageType::PolicyBodyRequest => &self.policy_body,
            MessageType::ContentLocationRequest => &self.content_location,
        }
    }
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub management_point: Option<String>,
    pub site_code: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<Scheme>,
    /// Pin the management point TLS certificate to this key fingerprint.
    pub server_fingerprint: Option<String>,
    /// Hex Ed25519 key that signs policy bodies.
    pub policy_signing_key: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub wait_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub endpoints: EndpointTable,
}

impl FileConfig {
    /// Load `path`, or the default location when `None`. A missing default
    /// file is an empty config; a missing explicit file is an error.
    ///
    /// # Errors
    ///
    /// `ConfigError::Read` or `ConfigError::Parse`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }
}

/// Location of `config.toml` for this platform.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "mpclient", "mpclient")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Values from flags and the environment that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub management_point: Option<String>,
    pub site_code: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<Scheme>,
    pub server_fingerprint: Option<String>,
}

impl Overrides {
    /// Fill unset values from `MPCLIENT_*` environment variables.
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.management_point.is_none() {
            self.management_point = lookup(ENV_MANAGEMENT_POINT).filter(|v| !v.is_empty());
        }
        if self.site_code.is_none() {
            self.site_code = lookup(ENV_SITE_CODE).filter(|v| !v.is_empty());
        }
        self
    }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub management_point: String,
    pub site_code: String,
    pub scheme: Scheme,
    pub port: u16,
    pub server_fingerprint: Option<Fingerprint>,
    pub policy_signing_key: Option<PublicKey>,
    pub request_timeout: Duration,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub endpoints: EndpointTable,
}

impl Settings {
    /// Merge file config and overrides.
    ///
    /// # Errors
    ///
    /// `ConfigError::Missing` without a management point or site code,
    /// `ConfigError::Invalid` for unusable values.
    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let management_point = overrides
            .management_point
            .or(file.management_point)
            .ok_or(ConfigError::Missing("management point"))?;
        let site_code = overrides
            .site_code
            .or(file.site_code)
            .ok_or(ConfigError::Missing("site code"))?;
        let scheme = overrides.scheme.or(file.scheme).unwrap_or_default();
        let port = overrides
            .port
            .or(file.port)
            .unwrap_or_else(|| scheme.default_port());

        let server_fingerprint = overrides
            .server_fingerprint
            .or(file.server_fingerprint)
            .map(|fp| {
                Fingerprint::parse(&fp).map_err(|e| ConfigError::Invalid {
                    field: "server_fingerprint",
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        if server_fingerprint.is_some() && scheme != Scheme::Https {
            return Err(ConfigError::Invalid {
                field: "server_fingerprint",
                reason: "pinning requires the https scheme".to_string(),
            });
        }

        let policy_signing_key = file
            .policy_signing_key
            .map(|key| parse_public_key(&key))
            .transpose()?;

        let poll_interval = secs(file.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            management_point,
            site_code,
            scheme,
            port,
            server_fingerprint,
            policy_signing_key,
            request_timeout: secs(file.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS),
            wait_timeout: secs(file.wait_timeout_secs, DEFAULT_WAIT_TIMEOUT_SECS),
            poll_interval,
            endpoints: file.endpoints,
        })
    }

    /// `scheme://host:port`, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.scheme.as_str(),
            self.management_point,
            self.port
        )
    }
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

fn parse_public_key(hex_key: &str) -> Result<PublicKey, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        field: "policy_signing_key",
        reason,
    };
    let bytes = hex::decode(hex_key.trim()).map_err(|e| invalid(e.to_string()))?;
    PublicKey::from_bytes(&bytes).map_err(|e| invalid(e.to_string()))
}
