//! Object store implementation of the sandbox store service.
//!
//! Implements both halves of the service contract in-process: blob
//! transfer ([`TransferGateway`]) and assignment calls ([`SandboxStoreRpc`]).
//! Backed by the `object_store` crate (S3 and compatibles, local
//! filesystem, memory) plus a [`MetadataDb`] for assignments.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use object_store::{ObjectStore, ObjectStoreExt, PutMode, PutOptions, PutPayload};
use tracing::{debug, info};

use crate::config::{check_backend_id, SandboxStoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::location::LocationDescriptor;
use crate::registry::{MetadataDb, SandboxStoreRpc};
use crate::transfer::{KeyBuilder, StoreSpec, TransferGateway};
use crate::types::{
    AssignmentHint, EntityAssignments, EntityId, Owner, SandboxAssignment,
};

/// Sandbox store backed by `object_store`.
pub struct ObjectStoreSandboxService {
    inner: Arc<dyn ObjectStore>,
    keys: KeyBuilder,
    backend_id: String,
    metadata: Arc<MetadataDb>,
}

impl std::fmt::Debug for ObjectStoreSandboxService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreSandboxService")
            .field("backend_id", &self.backend_id)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreSandboxService {
    /// Create a service from a parsed spec.
    pub async fn from_spec(
        spec: &StoreSpec,
        backend_id: impl Into<String>,
        metadata: Arc<MetadataDb>,
    ) -> StoreResult<Self> {
        let backend_id = backend_id.into();
        check_backend_id(&backend_id)?;

        let inner: Arc<dyn ObjectStore> = match spec.scheme.as_str() {
            "memory" => Arc::new(object_store::memory::InMemory::new()),
            "file" => {
                let path = spec.local_path();
                std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
                    message: format!(
                        "failed to create store directory {}: {}",
                        path.display(),
                        e
                    ),
                })?;
                Arc::new(
                    object_store::local::LocalFileSystem::new_with_prefix(&path).map_err(|e| {
                        StoreError::Io {
                            message: format!(
                                "failed to create local store at {}: {}",
                                path.display(),
                                e
                            ),
                        }
                    })?,
                )
            }
            "s3" => {
                let bucket = spec
                    .bucket
                    .as_ref()
                    .ok_or_else(|| StoreError::InvalidSpec {
                        spec: format!("s3://{:?}/{}", spec.bucket, spec.prefix),
                        reason: "S3 URL must include bucket name".to_string(),
                    })?;

                let mut builder = object_store::aws::AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_allow_http(false);

                if let Some(region) = &spec.region {
                    builder = builder.with_region(region);
                }

                Arc::new(builder.build().map_err(|e| StoreError::Io {
                    message: format!("failed to create S3 client: {}", e),
                })?)
            }
            scheme => {
                return Err(StoreError::InvalidSpec {
                    spec: spec.scheme.clone(),
                    reason: format!("unsupported scheme: {}", scheme),
                })
            }
        };

        // file:// keys are already rooted at the prefix directory
        let prefix = if spec.is_file() { "" } else { spec.prefix.as_str() };

        Ok(Self {
            inner,
            keys: KeyBuilder::new(prefix),
            backend_id,
            metadata,
        })
    }

    /// Create a service from configuration, keeping assignments in `metadata`.
    pub async fn from_config(
        config: &SandboxStoreConfig,
        metadata: Arc<MetadataDb>,
    ) -> StoreResult<Self> {
        config.validate()?;
        let spec = StoreSpec::parse(&config.store_url)?;
        Self::from_spec(&spec, &config.backend_id, metadata).await
    }

    /// In-memory service for testing.
    pub fn memory(backend_id: impl Into<String>) -> StoreResult<Self> {
        Self::memory_with_metadata(backend_id, Arc::new(MetadataDb::in_memory()))
    }

    /// In-memory service sharing an existing metadata database.
    pub fn memory_with_metadata(
        backend_id: impl Into<String>,
        metadata: Arc<MetadataDb>,
    ) -> StoreResult<Self> {
        let backend_id = backend_id.into();
        check_backend_id(&backend_id)?;
        Ok(Self {
            inner: Arc::new(object_store::memory::InMemory::new()),
            keys: KeyBuilder::new(""),
            backend_id,
            metadata,
        })
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn metadata(&self) -> &Arc<MetadataDb> {
        &self.metadata
    }

    /// Conditional put. An existing object under the same content-addressed
    /// key holds the same bytes, so it counts as stored.
    async fn put_if_not_exists(
        &self,
        key: &object_store::path::Path,
        bytes: bytes::Bytes,
    ) -> StoreResult<()> {
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };

        match self
            .inner
            .put_opts(key, PutPayload::from_bytes(bytes.clone()), opts)
            .await
        {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => {
                debug!(key = %key, "sandbox already stored");
                Ok(())
            }
            Err(object_store::Error::NotSupported { .. }) => {
                // Fallback: check if exists, then put
                if self.inner.head(key).await.is_ok() {
                    debug!(key = %key, "sandbox already stored");
                    return Ok(());
                }
                self.inner
                    .put(key, PutPayload::from_bytes(bytes))
                    .await
                    .map_err(|e| StoreError::transfer(format!("failed to put object: {}", e)))?;
                Ok(())
            }
            Err(e) => Err(StoreError::transfer(format!("failed to put object: {}", e))),
        }
    }
}

#[async_trait]
impl TransferGateway for ObjectStoreSandboxService {
    async fn send_named_blob(
        &self,
        local_path: &Path,
        canonical_name: &str,
        assign_to: &AssignmentHint,
    ) -> StoreResult<LocationDescriptor> {
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            StoreError::transfer(format!("cannot read {}: {}", local_path.display(), e))
        })?;
        let size = data.len();

        let key = self.keys.sandbox_key(canonical_name);
        let location = LocationDescriptor::new(&self.backend_id, KeyBuilder::physical_name(&key))?;
        self.put_if_not_exists(&key, bytes::Bytes::from(data)).await?;

        if !assign_to.is_empty() {
            let assignments: EntityAssignments = assign_to
                .iter()
                .map(|(entity, sb_type)| {
                    (
                        entity.clone(),
                        vec![SandboxAssignment::new(location.clone(), *sb_type)],
                    )
                })
                .collect();
            self.metadata
                .blocking(move |db| db.assign(&assignments, None))
                .await?;
        }

        info!(location = %location, size, entities = assign_to.len(), "sandbox stored");
        Ok(location)
    }

    async fn fetch_named_blob(
        &self,
        backend_id: &str,
        physical_name: &str,
        destination_dir: &Path,
    ) -> StoreResult<PathBuf> {
        if backend_id != self.backend_id {
            return Err(StoreError::transfer(format!(
                "unknown storage backend '{}'",
                backend_id
            )));
        }

        let key = KeyBuilder::key_for_physical_name(physical_name);
        let result = self.inner.get(&key).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => {
                StoreError::transfer(format!("no such sandbox: {}", physical_name))
            }
            _ => StoreError::transfer(format!("failed to get sandbox: {}", e)),
        })?;
        let data = result
            .bytes()
            .await
            .map_err(|e| StoreError::transfer(format!("failed to read sandbox bytes: {}", e)))?;

        let file_name = physical_name
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                StoreError::transfer(format!("physical name has no file name: {}", physical_name))
            })?;
        let target = destination_dir.join(file_name);
        tokio::fs::write(&target, &data).await.map_err(|e| StoreError::Io {
            message: format!("cannot write {}: {}", target.display(), e),
        })?;

        debug!(physical_name, bytes = data.len(), "sandbox fetched");
        Ok(target)
    }
}

#[async_trait]
impl SandboxStoreRpc for ObjectStoreSandboxService {
    async fn assign_sandboxes_to_entities(
        &self,
        assignments: &EntityAssignments,
        owner: Option<&Owner>,
    ) -> StoreResult<()> {
        let assignments = assignments.clone();
        let owner = owner.cloned();
        self.metadata
            .blocking(move |db| db.assign(&assignments, owner.as_ref()))
            .await
    }

    async fn unassign_entities(&self, entities: &[EntityId]) -> StoreResult<()> {
        let entities = entities.to_vec();
        self.metadata
            .blocking(move |db| db.unassign(&entities))
            .await
    }

    async fn get_sandboxes_assigned_to_entity(
        &self,
        entity: &EntityId,
    ) -> StoreResult<Vec<SandboxAssignment>> {
        let entity = entity.clone();
        self.metadata
            .blocking(move |db| db.assignments_for(&entity))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SandboxType;

    async fn stored(
        service: &ObjectStoreSandboxService,
        content: &[u8],
        hint: &AssignmentHint,
    ) -> LocationDescriptor {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle");
        std::fs::write(&path, content).unwrap();
        service
            .send_named_blob(&path, "abcdef.tar.bz2", hint)
            .await
            .unwrap()
    }

    fn memory_service() -> ObjectStoreSandboxService {
        ObjectStoreSandboxService::memory("SandboxSE").unwrap()
    }

    #[tokio::test]
    async fn test_send_then_fetch() {
        let service = memory_service();
        let location = stored(&service, b"archive bytes", &AssignmentHint::new()).await;

        assert_eq!(location.backend_id(), "SandboxSE");
        assert_eq!(location.physical_name(), "/sandboxes/ab/abcdef.tar.bz2");

        let dest = tempfile::tempdir().unwrap();
        let path = service
            .fetch_named_blob(location.backend_id(), location.physical_name(), dest.path())
            .await
            .unwrap();
        assert_eq!(path, dest.path().join("abcdef.tar.bz2"));
        assert_eq!(std::fs::read(path).unwrap(), b"archive bytes");
    }

    #[tokio::test]
    async fn test_same_name_is_deduplicated() {
        let service = memory_service();
        let first = stored(&service, b"same", &AssignmentHint::new()).await;
        let second = stored(&service, b"same", &AssignmentHint::new()).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_hint_assigns_with_upload() {
        let service = memory_service();
        let mut hint = AssignmentHint::new();
        hint.insert(EntityId::job(9), SandboxType::Output);
        let location = stored(&service, b"out", &hint).await;

        let records = service
            .get_sandboxes_assigned_to_entity(&EntityId::job(9))
            .await
            .unwrap();
        assert_eq!(
            records,
            vec![SandboxAssignment::new(location, SandboxType::Output)]
        );
    }

    #[tokio::test]
    async fn test_fetch_missing_is_transfer_failure() {
        let service = memory_service();
        let dest = tempfile::tempdir().unwrap();
        let err = service
            .fetch_named_blob("SandboxSE", "/sandboxes/no/nothing.tar.bz2", dest.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TransferFailed { .. }));
    }

    #[tokio::test]
    async fn test_fetch_from_other_backend_fails() {
        let service = memory_service();
        let dest = tempfile::tempdir().unwrap();
        let err = service
            .fetch_named_blob("OtherSE", "/sandboxes/ab/abcdef.tar.bz2", dest.path())
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::TransferFailed { ref message } if message.contains("OtherSE"))
        );
    }

    #[tokio::test]
    async fn test_file_store_spec() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().join("store").display());
        let spec = StoreSpec::parse(&url).unwrap();
        let metadata = Arc::new(MetadataDb::in_memory());
        let service = ObjectStoreSandboxService::from_spec(&spec, "LocalSE", metadata)
            .await
            .unwrap();
        let location = stored(&service, b"on disk", &AssignmentHint::new()).await;
        assert!(dir
            .path()
            .join("store/sandboxes/ab/abcdef.tar.bz2")
            .exists());
        assert_eq!(location.backend_id(), "LocalSE");
    }

    #[tokio::test]
    async fn test_backend_with_separator_rejected_up_front() {
        let err = ObjectStoreSandboxService::memory("a|b").unwrap_err();
        assert!(matches!(err, StoreError::Config { .. }));

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let spec = StoreSpec::parse(&format!("file://{}", root.display())).unwrap();
        let err =
            ObjectStoreSandboxService::from_spec(&spec, "a|b", Arc::new(MetadataDb::in_memory()))
                .await
                .unwrap_err();
        assert!(matches!(err, StoreError::Config { .. }));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_from_config_keeps_assignments_in_given_db() {
        let metadata = Arc::new(MetadataDb::in_memory());
        let service =
            ObjectStoreSandboxService::from_config(&SandboxStoreConfig::default(), metadata.clone())
                .await
                .unwrap();

        let mut hint = AssignmentHint::new();
        hint.insert(EntityId::pilot("p"), SandboxType::Input);
        stored(&service, b"x", &hint).await;
        assert_eq!(metadata.entity_count(), 1);
    }
}
