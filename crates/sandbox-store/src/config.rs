//! Client configuration.
//!
//! ```yaml
//! backend_id: SandboxSE
//! store_url: s3://wms-sandboxes/prod?region=eu-west-1
//! transfer_timeout_secs: 600
//! staging_dir: /scratch/tmp
//! metadata_db: file:///var/lib/sandbox-store/meta.json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::registry::DirectAccess;

/// Sandbox store client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxStoreConfig {
    /// Storage backend id published in location descriptors.
    #[serde(default = "default_backend_id")]
    pub backend_id: String,

    /// Object store URL (`memory://`, `file:///path`, `s3://bucket/prefix`).
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Time budget for each transfer or service call.
    #[serde(default = "default_timeout")]
    pub transfer_timeout_secs: u64,

    /// Where staging archives are written. System temp dir if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,

    /// Metadata database for direct assignment access. Disabled if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_db: Option<String>,
}

fn default_backend_id() -> String {
    "SandboxSE".to_string()
}

fn default_store_url() -> String {
    "memory://".to_string()
}

fn default_timeout() -> u64 {
    600
}

impl Default for SandboxStoreConfig {
    fn default() -> Self {
        Self {
            backend_id: default_backend_id(),
            store_url: default_store_url(),
            transfer_timeout_secs: default_timeout(),
            staging_dir: None,
            metadata_db: None,
        }
    }
}

impl SandboxStoreConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `SANDBOX_STORE_URL` | Object store URL |
    /// | `SANDBOX_STORE_BACKEND` | Backend id |
    /// | `SANDBOX_STORE_TIMEOUT` | Transfer timeout in seconds |
    /// | `SANDBOX_STORE_STAGING_DIR` | Staging directory |
    /// | `SANDBOX_STORE_METADATA_DB` | Metadata database URL for direct access |
    ///
    /// Unset or empty variables take their defaults. The result is validated
    /// like a YAML configuration.
    pub fn from_env() -> StoreResult<Self> {
        let config = Self {
            backend_id: non_empty_var("SANDBOX_STORE_BACKEND")
                .unwrap_or_else(default_backend_id),
            store_url: non_empty_var("SANDBOX_STORE_URL").unwrap_or_else(default_store_url),
            transfer_timeout_secs: std::env::var("SANDBOX_STORE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
            staging_dir: non_empty_var("SANDBOX_STORE_STAGING_DIR").map(PathBuf::from),
            metadata_db: non_empty_var("SANDBOX_STORE_METADATA_DB"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> StoreResult<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| StoreError::Config {
            message: format!("invalid configuration: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| StoreError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Set the store URL.
    pub fn with_store_url(mut self, url: impl Into<String>) -> Self {
        self.store_url = url.into();
        self
    }

    /// Set the backend id.
    pub fn with_backend_id(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = backend_id.into();
        self
    }

    /// Set the transfer timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the staging directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Direct metadata access requested by this configuration.
    pub fn direct_access(&self) -> DirectAccess {
        match &self.metadata_db {
            Some(url) => DirectAccess::Open(url.clone()),
            None => DirectAccess::Disabled,
        }
    }

    /// Reject a backend id that cannot appear in a location descriptor and
    /// a zero timeout.
    pub fn validate(&self) -> StoreResult<()> {
        check_backend_id(&self.backend_id)?;
        if self.transfer_timeout_secs == 0 {
            return Err(StoreError::Config {
                message: "transfer_timeout_secs must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// A backend id must be non-empty and free of the descriptor separator.
pub(crate) fn check_backend_id(backend_id: &str) -> StoreResult<()> {
    if backend_id.is_empty() || backend_id.contains('|') {
        return Err(StoreError::Config {
            message: format!("invalid backend_id '{}'", backend_id),
        });
    }
    Ok(())
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
