//! Sandbox store client.
//!
//! Ties the pieces together:
//!
//! ```text
//! upload:   SandboxBundler -> SizeGuard -> BundleDigest -> TransferGateway (+ assignment hint)
//! download: AssignmentRegistry -> LocationDescriptor -> TransferGateway -> FetchedBundle
//! ```
//!
//! Archive work runs on the blocking pool; every gateway call is bounded
//! by the configured transfer timeout.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::bundle::{
    fetch_dir, BundleDigest, DownloadOutcome, FetchedBundle, SandboxBundler, SizeGuard,
    StagedBundle,
};
use crate::config::SandboxStoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::location::LocationDescriptor;
use crate::registry::{
    AssignmentRegistry, DirectAccess, DirectAccessStatus, MetadataDb, RemoteHandle,
    SandboxStoreRpc,
};
use crate::service::ObjectStoreSandboxService;
use crate::transfer::{with_timeout, TransferGateway};
use crate::types::{
    AssignmentHint, EntityId, EntityList, Owner, SandboxAssignment, SandboxInput, SandboxType,
    SandboxesByType,
};

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Where the sandbox was stored.
    pub location: LocationDescriptor,
    /// MD5 of the uploaded archive.
    pub digest: BundleDigest,
    /// Compressed archive size in bytes.
    pub size: u64,
}

/// How a sandbox is delivered to the caller.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Target directory. Current directory if unset; created when missing.
    pub destination: Option<PathBuf>,
    /// Return the archive bytes instead of touching `destination`.
    pub in_memory: bool,
    /// Extract the archive. When false the archive itself is kept.
    pub unpack: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            destination: None,
            in_memory: false,
            unpack: true,
        }
    }
}

impl DownloadOptions {
    pub fn into_dir(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    pub fn packed(mut self) -> Self {
        self.unpack = false;
        self
    }
}

/// Client for the sandbox store.
pub struct SandboxStoreClient {
    gateway: Arc<dyn TransferGateway>,
    registry: AssignmentRegistry,
    bundler: SandboxBundler,
    staging_dir: Option<PathBuf>,
    timeout: Duration,
}

impl fmt::Debug for SandboxStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxStoreClient")
            .field("registry", &self.registry)
            .field("staging_dir", &self.staging_dir)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SandboxStoreClient {
    /// Create a client. Direct metadata access follows `config.metadata_db`.
    pub fn new(
        config: &SandboxStoreConfig,
        gateway: Arc<dyn TransferGateway>,
        rpc: Arc<dyn SandboxStoreRpc>,
    ) -> Self {
        Self::with_direct_access(config, gateway, rpc, config.direct_access())
    }

    /// Create a client with an explicit direct metadata access mode.
    pub fn with_direct_access(
        config: &SandboxStoreConfig,
        gateway: Arc<dyn TransferGateway>,
        rpc: Arc<dyn SandboxStoreRpc>,
        direct: DirectAccess,
    ) -> Self {
        let timeout = config.transfer_timeout();
        let mut bundler = SandboxBundler::new();
        if let Some(dir) = &config.staging_dir {
            bundler = bundler.with_staging_dir(dir);
        }

        Self {
            gateway,
            registry: AssignmentRegistry::new(RemoteHandle::new(rpc, timeout), direct),
            bundler,
            staging_dir: config.staging_dir.clone(),
            timeout,
        }
    }

    /// Client talking to an in-process [`ObjectStoreSandboxService`].
    pub fn from_service(
        config: &SandboxStoreConfig,
        service: Arc<ObjectStoreSandboxService>,
    ) -> Self {
        let gateway: Arc<dyn TransferGateway> = service.clone();
        let rpc: Arc<dyn SandboxStoreRpc> = service;
        Self::new(config, gateway, rpc)
    }

    /// Build the object store service described by `config` and a client on top.
    ///
    /// `metadata_db` is opened once. The service and the direct path share it,
    /// so records written either way are visible to both. If it cannot be
    /// opened the service keeps its assignments in memory and direct access
    /// reports the failure.
    pub async fn connect(config: &SandboxStoreConfig) -> StoreResult<Self> {
        config.validate()?;

        let (metadata, direct) = match &config.metadata_db {
            Some(url) => match MetadataDb::open(url) {
                Ok(db) => {
                    let db = Arc::new(db);
                    (db.clone(), DirectAccess::Shared(db))
                }
                Err(e) => {
                    warn!(
                        url = %url,
                        error = %e,
                        "metadata db unavailable, keeping assignments in memory"
                    );
                    let reason = e.to_string();
                    (Arc::new(MetadataDb::in_memory()), DirectAccess::Unavailable(reason))
                }
            },
            None => (Arc::new(MetadataDb::in_memory()), DirectAccess::Disabled),
        };

        let service = Arc::new(ObjectStoreSandboxService::from_config(config, metadata).await?);
        let gateway: Arc<dyn TransferGateway> = service.clone();
        let rpc: Arc<dyn SandboxStoreRpc> = service;
        Ok(Self::with_direct_access(config, gateway, rpc, direct))
    }

    pub fn registry(&self) -> &AssignmentRegistry {
        &self.registry
    }

    pub fn direct_access_status(&self) -> DirectAccessStatus {
        self.registry.direct_access()
    }

    // ---- upload ----

    /// Bundle `inputs`, check the size, and store the archive.
    ///
    /// `size_limit` is in bytes; 0 disables the check. `assign_to` is sent
    /// with the archive so the sandbox is assigned as it is stored. The
    /// staging archive is removed once the transfer has been attempted,
    /// except after a size failure, where its path is in the error.
    pub async fn upload_files_as_sandbox(
        &self,
        inputs: &[SandboxInput],
        size_limit: u64,
        assign_to: &AssignmentHint,
    ) -> StoreResult<UploadReceipt> {
        let bundler = self.bundler.clone();
        let inputs = inputs.to_vec();
        let guard = SizeGuard::new(size_limit);

        let (staged, digest) = run_blocking(move || -> StoreResult<(StagedBundle, BundleDigest)> {
            let staged = guard.check(bundler.build(&inputs)?)?;
            let digest = staged.digest()?;
            Ok((staged, digest))
        })
        .await?;

        let name = digest.canonical_name();
        let size = staged.size();
        debug!(name = %name, size, entities = assign_to.len(), "sending sandbox");

        let sent = with_timeout(
            self.timeout,
            "sendFile",
            self.gateway.send_named_blob(staged.path(), &name, assign_to),
        )
        .await;
        staged.close();
        let location = sent?;

        info!(location = %location, digest = %digest, size, "sandbox uploaded");
        Ok(UploadReceipt {
            location,
            digest,
            size,
        })
    }

    /// Upload and assign to one entity.
    pub async fn upload_files_as_sandbox_for_entity(
        &self,
        entity: &EntityId,
        inputs: &[SandboxInput],
        size_limit: u64,
        sb_type: SandboxType,
    ) -> StoreResult<UploadReceipt> {
        let mut hint = AssignmentHint::new();
        hint.insert(entity.clone(), sb_type);
        self.upload_files_as_sandbox(inputs, size_limit, &hint).await
    }

    /// Upload and assign to `Job:<job_id>`.
    pub async fn upload_files_as_sandbox_for_job(
        &self,
        job_id: impl fmt::Display,
        inputs: &[SandboxInput],
        size_limit: u64,
        sb_type: SandboxType,
    ) -> StoreResult<UploadReceipt> {
        self.upload_files_as_sandbox_for_entity(&EntityId::job(job_id), inputs, size_limit, sb_type)
            .await
    }

    // ---- download ----

    /// Fetch one sandbox by its location string.
    pub async fn download_sandbox(
        &self,
        location: &str,
        options: &DownloadOptions,
    ) -> StoreResult<DownloadOutcome> {
        let location = LocationDescriptor::parse(location)?;
        self.download_location(&location, options).await
    }

    /// Fetch one sandbox.
    pub async fn download_location(
        &self,
        location: &LocationDescriptor,
        options: &DownloadOptions,
    ) -> StoreResult<DownloadOutcome> {
        let destination = match &options.destination {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(|e| StoreError::Io {
                message: format!("cannot determine current directory: {}", e),
            })?,
        };
        if !options.in_memory {
            std::fs::create_dir_all(&destination).map_err(|e| StoreError::Io {
                message: format!("cannot create {}: {}", destination.display(), e),
            })?;
        }

        let dir = fetch_dir(self.staging_dir.as_deref())?;
        let archive = with_timeout(
            self.timeout,
            "getFile",
            self.gateway
                .fetch_named_blob(location.backend_id(), location.physical_name(), dir.path()),
        )
        .await?;
        let fetched = FetchedBundle::new(dir, archive);
        debug!(location = %location, "sandbox received");

        let outcome = if options.in_memory {
            DownloadOutcome::InMemory(run_blocking(move || fetched.read_into_memory()).await?)
        } else if !options.unpack {
            let dest = destination.clone();
            DownloadOutcome::Archive(run_blocking(move || fetched.persist_into(&dest)).await?)
        } else {
            let dest = destination.clone();
            let bytes = run_blocking(move || fetched.extract_into(&dest)).await?;
            DownloadOutcome::Extracted { bytes, destination }
        };

        info!(
            location = %location,
            in_memory = options.in_memory,
            unpack = options.unpack,
            "sandbox downloaded"
        );
        Ok(outcome)
    }

    /// Fetch the sandboxes of `sb_type` assigned to `entity`.
    ///
    /// In memory, only the most recently assigned one is fetched. Otherwise
    /// all are fetched in assignment order, stopping at the first failure.
    pub async fn download_sandbox_for_entity(
        &self,
        entity: &EntityId,
        sb_type: SandboxType,
        options: &DownloadOptions,
    ) -> StoreResult<Vec<DownloadOutcome>> {
        let mut locations = self.registry.resolve_type(entity, sb_type).await?;

        if options.in_memory {
            let latest = locations.pop().ok_or_else(|| StoreError::NoSandboxOfType {
                entity: entity.to_string(),
                sb_type: sb_type.to_string(),
            })?;
            return Ok(vec![self.download_location(&latest, options).await?]);
        }

        let mut outcomes = Vec::with_capacity(locations.len());
        for location in &locations {
            outcomes.push(self.download_location(location, options).await?);
        }
        Ok(outcomes)
    }

    pub async fn download_sandbox_for_job(
        &self,
        job_id: impl fmt::Display,
        sb_type: SandboxType,
        options: &DownloadOptions,
    ) -> StoreResult<Vec<DownloadOutcome>> {
        self.download_sandbox_for_entity(&EntityId::job(job_id), sb_type, options)
            .await
    }

    // ---- assignment ----

    pub async fn assign_sandboxes_to_entity(
        &self,
        entity: &EntityId,
        sandboxes: &[SandboxAssignment],
        owner: Option<&Owner>,
    ) -> StoreResult<()> {
        self.registry.assign(entity, sandboxes, owner).await
    }

    /// Assign `(location, type)` string pairs to `Job:<job_id>`. Nothing is
    /// assigned if any pair is invalid.
    pub async fn assign_sandboxes_to_job<L, T>(
        &self,
        job_id: impl fmt::Display,
        pairs: &[(L, T)],
        owner: Option<&Owner>,
    ) -> StoreResult<()>
    where
        L: AsRef<str> + Sync,
        T: AsRef<str> + Sync,
    {
        self.registry
            .assign_raw(&EntityId::job(job_id), pairs, owner)
            .await
    }

    pub async fn unassign_entities(&self, entities: impl Into<EntityList>) -> StoreResult<()> {
        self.registry.unassign(entities).await
    }

    pub async fn unassign_jobs<I: fmt::Display>(&self, job_ids: &[I]) -> StoreResult<()> {
        let entities: Vec<EntityId> = job_ids.iter().map(EntityId::job).collect();
        self.registry.unassign(entities).await
    }

    /// Sandboxes assigned to `entity`, grouped by type.
    pub async fn sandboxes_assigned_to_entity(
        &self,
        entity: &EntityId,
    ) -> StoreResult<SandboxesByType> {
        self.registry.resolve(entity).await
    }
}

/// Run archive work on the blocking pool.
async fn run_blocking<T, F>(work: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Other(anyhow!("blocking task failed: {}", e)))?
}
