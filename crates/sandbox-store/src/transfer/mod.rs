//! Transfer of sandbox bytes to and from the remote store.
//!
//! The gateway is the only part of the crate that talks to the network.
//! Everything else (bundling, naming, unpacking) is local.
//!
//! # Store URLs
//!
//! ```text
//! s3://my-bucket/sandboxes?region=eu-west-1
//! file:///var/lib/sandboxes
//! memory://  (for testing)
//! ```

pub mod naming;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

pub use naming::KeyBuilder;

use crate::error::{StoreError, StoreResult};
use crate::location::LocationDescriptor;
use crate::types::AssignmentHint;

/// Narrow interface to the remote sandbox store.
///
/// Ordinary failures (missing object, quota, network) are reported as
/// `Err(StoreError::TransferFailed)`; retry policy is left to the caller.
#[async_trait]
pub trait TransferGateway: Send + Sync {
    /// Store the archive at `local_path` under `canonical_name`, assigning
    /// it to the entities in `assign_to` as part of the same call.
    ///
    /// Returns the location of the stored sandbox.
    async fn send_named_blob(
        &self,
        local_path: &Path,
        canonical_name: &str,
        assign_to: &AssignmentHint,
    ) -> StoreResult<LocationDescriptor>;

    /// Fetch `physical_name` from `backend_id` into `destination_dir`.
    ///
    /// Returns the path of the received file.
    async fn fetch_named_blob(
        &self,
        backend_id: &str,
        physical_name: &str,
        destination_dir: &Path,
    ) -> StoreResult<PathBuf>;
}

/// Run `fut` under `budget`, turning an elapsed timer into `TransferFailed`.
pub(crate) async fn with_timeout<T, F>(budget: Duration, operation: &str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::transfer(format!(
            "{} timed out after {}s",
            operation,
            budget.as_secs()
        ))),
    }
}

/// Parsed store specification from config.
#[derive(Debug, Clone)]
pub struct StoreSpec {
    /// The scheme (s3, file, memory)
    pub scheme: String,
    /// Bucket name (empty for file://)
    pub bucket: Option<String>,
    /// Base prefix/path within the bucket
    pub prefix: String,
    /// Optional region (for S3)
    pub region: Option<String>,
}

impl StoreSpec {
    /// Parse a store URL like `s3://bucket/prefix` or `file:///path`.
    pub fn parse(url: &str) -> StoreResult<Self> {
        let parsed = url::Url::parse(url).map_err(|e| StoreError::InvalidSpec {
            spec: url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = parsed.scheme().to_string();
        let bucket = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|s| s.to_string());
        let prefix = parsed.path().trim_start_matches('/').to_string();

        let region = parsed
            .query_pairs()
            .find(|(k, _)| k == "region")
            .map(|(_, v)| v.to_string());

        Ok(Self {
            scheme,
            bucket,
            prefix,
            region,
        })
    }

    pub fn is_memory(&self) -> bool {
        self.scheme == "memory"
    }

    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }

    /// Local filesystem path for `file://` specs.
    pub fn local_path(&self) -> PathBuf {
        match &self.bucket {
            Some(host) => PathBuf::from(format!("/{}/{}", host, self.prefix)),
            None => PathBuf::from(format!("/{}", self.prefix)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_spec() {
        let spec = StoreSpec::parse("s3://my-bucket/sandboxes?region=eu-west-1").unwrap();
        assert_eq!(spec.scheme, "s3");
        assert_eq!(spec.bucket, Some("my-bucket".to_string()));
        assert_eq!(spec.prefix, "sandboxes");
        assert_eq!(spec.region, Some("eu-west-1".to_string()));
    }

    #[test]
    fn test_parse_file_spec() {
        let spec = StoreSpec::parse("file:///var/lib/sandboxes").unwrap();
        assert!(spec.is_file());
        assert!(spec.bucket.is_none());
        assert_eq!(spec.local_path(), PathBuf::from("/var/lib/sandboxes"));
    }

    #[test]
    fn test_parse_memory_spec() {
        assert!(StoreSpec::parse("memory://").unwrap().is_memory());
    }

    #[test]
    fn test_invalid_spec() {
        let err = StoreSpec::parse("not a url").unwrap_err();
        assert!(matches!(err, StoreError::InvalidSpec { .. }));
    }

    #[tokio::test]
    async fn test_timeout_becomes_transfer_failure() {
        let err = with_timeout(Duration::from_millis(10), "sendFile", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            StoreError::TransferFailed { ref message } if message.contains("sendFile")
        ));
    }
}
