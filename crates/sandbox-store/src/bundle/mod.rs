//! Sandbox bundles: building, size checks, digests and unpacking.

pub mod digest;
pub mod limits;
pub mod unpack;
pub mod writer;

pub use digest::{BundleDigest, BUNDLE_SUFFIX, DIGEST_CHUNK_SIZE};
pub use limits::SizeGuard;
pub use unpack::{fetch_dir, DownloadOutcome, FetchedBundle, FETCH_DIR_PREFIX};
pub use writer::{SandboxBundler, StagedBundle, STAGING_FILE_PREFIX};
