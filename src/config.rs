//! Configuration types for the eSocial client.

use crate::batch::DEFAULT_MAX_BATCH_SIZE;
use crate::credential::Credential;
use crate::envelope::SchemaVersions;
use crate::error::{EsocialError, Result};
use crate::identity::Identity;
use crate::transport::{Endpoints, Service, Target};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the eSocial client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Employer the events belong to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employer: Option<Identity>,

    /// Transmitter sending on the employer's behalf
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Identity>,

    /// Certificate and key used for signing and mutual TLS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialConfig>,

    /// PEM bundle of CAs trusted for the server certificate, replacing the
    /// bundled eSocial chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<PathBuf>,

    /// Environment: "production" or "restricted"
    pub target: Target,

    /// Maximum number of events per batch (1 to 50)
    pub max_batch_size: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Schema version of each operation envelope
    pub schema_versions: SchemaVersions,

    /// Endpoint overrides
    pub endpoints: EndpointOverrides,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            employer: None,
            sender: None,
            credential: None,
            ca_bundle: None,
            target: Target::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            timeout_secs: 60,
            schema_versions: SchemaVersions::default(),
            endpoints: EndpointOverrides::default(),
        }
    }
}

/// PEM files of the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Certificate chain, leaf first
    pub cert_path: PathBuf,
    /// RSA private key (PKCS#8 or PKCS#1)
    pub key_path: PathBuf,
}

/// Replacement URLs for the published endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOverrides {
    /// Serve every service from this base URL, keeping the standard paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieve: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_ids: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,
}

impl ClientConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| EsocialError::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EsocialError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 || self.max_batch_size > DEFAULT_MAX_BATCH_SIZE {
            return Err(EsocialError::Configuration(format!(
                "max_batch_size must be between 1 and {DEFAULT_MAX_BATCH_SIZE}, got {}",
                self.max_batch_size
            )));
        }
        if self.timeout_secs == 0 {
            return Err(EsocialError::Configuration(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Endpoints of the target with overrides applied.
    pub fn resolved_endpoints(&self) -> Endpoints {
        let overrides = &self.endpoints;
        let mut endpoints = match &overrides.base_url {
            Some(base) => Endpoints::at_base(base),
            None => Endpoints::for_target(self.target),
        };

        let replacements = [
            (Service::Send, &overrides.send),
            (Service::Retrieve, &overrides.retrieve),
            (Service::EventIds, &overrides.event_ids),
            (Service::Download, &overrides.download),
        ];
        for (service, url) in replacements {
            if let Some(url) = url {
                endpoints.set(service, url.clone());
            }
        }
        endpoints
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Load the configured credential, if any.
    pub fn load_credential(&self) -> Result<Option<Credential>> {
        self.credential
            .as_ref()
            .map(|c| Credential::from_pem_files(&c.cert_path, &c.key_path))
            .transpose()
            .map_err(EsocialError::from)
    }

    /// Read the configured CA bundle, if any.
    pub fn load_ca_bundle(&self) -> Result<Option<Vec<u8>>> {
        self.ca_bundle
            .as_ref()
            .map(|path| {
                std::fs::read(path).map_err(|e| {
                    EsocialError::Configuration(format!(
                        "failed to read CA bundle {}: {e}",
                        path.display()
                    ))
                })
            })
            .transpose()
    }
}
