//! Sandbox store client for distributed job execution.
//!
//! Packages input and output files of jobs and pilots into content-addressed
//! bundles, moves them to and from a remote store, and tracks which bundle
//! belongs to which entity:
//!
//! - Deterministic bzip2 tar bundles named `<md5>.tar.bz2`
//! - Size limits enforced before transfer
//! - `SB:<backend>|<physical name>` location descriptors
//! - Entity → sandbox assignments, through the service or a local database
//! - Download into memory, as an archive, or extracted
//!
//! # Quick Start
//!
//! ```no_run
//! use sandbox_store::{
//!     DownloadOptions, SandboxInput, SandboxStoreClient, SandboxStoreConfig, SandboxType,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = SandboxStoreConfig::from_env()?;
//! let client = SandboxStoreClient::connect(&config).await?;
//!
//! let inputs = [SandboxInput::path("a.txt"), SandboxInput::text("<job/>")];
//! let receipt = client
//!     .upload_files_as_sandbox_for_job(42, &inputs, 10 * 1024 * 1024, SandboxType::Input)
//!     .await?;
//! println!("stored at {}", receipt.location);
//!
//! client
//!     .download_sandbox_for_job(42, SandboxType::Input, &DownloadOptions::into_dir("work"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `SANDBOX_STORE_URL` | Object store URL (default: `memory://`) |
//! | `SANDBOX_STORE_BACKEND` | Backend id in descriptors (default: `SandboxSE`) |
//! | `SANDBOX_STORE_TIMEOUT` | Transfer timeout in seconds (default: 600) |
//! | `SANDBOX_STORE_STAGING_DIR` | Directory for staging archives |
//! | `SANDBOX_STORE_METADATA_DB` | Metadata database URL for direct assignment access |

pub mod bundle;
pub mod client;
pub mod config;
pub mod error;
pub mod location;
pub mod registry;
pub mod service;
pub mod transfer;
pub mod types;

// Re-export main types
pub use bundle::{BundleDigest, DownloadOutcome, SandboxBundler, SizeGuard, StagedBundle};
pub use client::{DownloadOptions, SandboxStoreClient, UploadReceipt};
pub use config::SandboxStoreConfig;
pub use error::{StoreError, StoreResult};
pub use location::LocationDescriptor;
pub use registry::{
    AssignmentRegistry, DirectAccess, DirectAccessStatus, MetadataDb, SandboxStoreRpc,
};
pub use service::ObjectStoreSandboxService;
pub use transfer::{StoreSpec, TransferGateway};
pub use types::{
    AssignmentHint, EntityAssignments, EntityId, EntityList, Owner, SandboxAssignment,
    SandboxInput, SandboxType, SandboxesByType, JOB_DESCRIPTION_NAME,
};
