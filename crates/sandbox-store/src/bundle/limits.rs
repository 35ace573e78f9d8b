//! Size limit applied to staged bundles before transfer.

use tracing::warn;

use super::writer::StagedBundle;
use crate::error::{StoreError, StoreResult};

/// Rejects bundles whose compressed size is over a byte limit.
///
/// A limit of 0 means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeGuard {
    limit: u64,
}

impl SizeGuard {
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    pub fn unbounded() -> Self {
        Self { limit: 0 }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Pass the bundle through, or keep its staging file on disk and report
    /// it in `SizeLimitExceeded`. The caller is then responsible for
    /// removing it.
    pub fn check(&self, staged: StagedBundle) -> StoreResult<StagedBundle> {
        if self.limit == 0 || staged.size() <= self.limit {
            return Ok(staged);
        }

        let size = staged.size();
        let path = staged.keep()?;
        warn!(
            path = %path.display(),
            size,
            limit = self.limit,
            "sandbox over the size limit, staging archive kept for inspection"
        );
        Err(StoreError::SizeLimitExceeded {
            path,
            size,
            limit: self.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::SandboxBundler;
    use crate::types::SandboxInput;

    fn staged(text: &str) -> StagedBundle {
        SandboxBundler::new()
            .build(&[SandboxInput::text(text)])
            .unwrap()
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        let big = "x".repeat(256 * 1024);
        let bundle = SizeGuard::unbounded().check(staged(&big)).unwrap();
        assert!(bundle.size() > 0);
    }

    #[test]
    fn test_within_limit_passes() {
        let bundle = staged("small");
        let size = bundle.size();
        let bundle = SizeGuard::new(size).check(bundle).unwrap();
        assert_eq!(bundle.size(), size);
    }

    #[test]
    fn test_over_limit_keeps_file() {
        let err = SizeGuard::new(1).check(staged("over the limit")).unwrap_err();
        let path = err.staging_path().unwrap().to_path_buf();
        assert!(path.exists(), "staging archive must survive for inspection");
        match err {
            StoreError::SizeLimitExceeded { size, limit, .. } => {
                assert!(size > limit);
                assert_eq!(limit, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        std::fs::remove_file(path).unwrap();
    }
}
