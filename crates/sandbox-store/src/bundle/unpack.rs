//! Unpacking of fetched sandbox bundles.
//!
//! A fetched bundle lives in its own `TMSB.` temp directory. Whatever the
//! caller does with it (read into memory, keep the archive, extract), the
//! temp directory is gone afterwards.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Prefix of download staging directories.
pub const FETCH_DIR_PREFIX: &str = "TMSB.";

/// Result of downloading one sandbox. The payload depends on the mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Raw archive bytes.
    InMemory(Bytes),
    /// Archive left packed at this path.
    Archive(PathBuf),
    /// Members extracted into `destination`; `bytes` is the sum of member sizes.
    Extracted { bytes: u64, destination: PathBuf },
}

impl DownloadOutcome {
    pub fn extracted_bytes(&self) -> Option<u64> {
        match self {
            Self::Extracted { bytes, .. } => Some(*bytes),
            _ => None,
        }
    }
}

/// Allocate a fresh download staging directory.
pub fn fetch_dir(parent: Option<&Path>) -> StoreResult<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(FETCH_DIR_PREFIX);
    match parent {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .map_err(|e| StoreError::TempAllocationFailed {
        message: e.to_string(),
    })
}

/// An archive received into a staging directory.
#[derive(Debug)]
pub struct FetchedBundle {
    dir: TempDir,
    archive: PathBuf,
}

enum Compression {
    Bzip2,
    Gzip,
    Plain,
}

impl FetchedBundle {
    pub fn new(dir: TempDir, archive: PathBuf) -> Self {
        Self { dir, archive }
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Read the archive into memory. The staging directory is removed on
    /// success and on failure.
    pub fn read_into_memory(self) -> StoreResult<Bytes> {
        let result = fs::read(&self.archive).map_err(|e| StoreError::Io {
            message: format!("failed to read the sandbox archive: {}", e),
        });
        self.cleanup();
        result.map(Bytes::from)
    }

    /// Move the archive, still packed, into `destination`.
    pub fn persist_into(self, destination: &Path) -> StoreResult<PathBuf> {
        let file_name = self
            .archive
            .file_name()
            .ok_or_else(|| StoreError::Io {
                message: format!("fetched archive has no name: {}", self.archive.display()),
            })?
            .to_owned();
        let target = destination.join(file_name);

        let moved = fs::rename(&self.archive, &target)
            .or_else(|_| fs::copy(&self.archive, &target).map(|_| ()))
            .map_err(|e| StoreError::Io {
                message: format!(
                    "cannot move {} to {}: {}",
                    self.archive.display(),
                    target.display(),
                    e
                ),
            });
        self.cleanup();
        moved.map(|_| target)
    }

    /// Extract every member into `destination` and return the sum of the
    /// member sizes recorded in the archive.
    pub fn extract_into(self, destination: &Path) -> StoreResult<u64> {
        let result = extract_archive(&self.archive, destination).map_err(|e| {
            StoreError::ArchiveOpenFailed {
                message: e.to_string(),
            }
        });
        self.cleanup();
        result
    }

    fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), error = %e, "could not remove temporary dir");
        }
    }
}

fn extract_archive(archive: &Path, destination: &Path) -> io::Result<u64> {
    let mut file = File::open(archive)?;
    let compression = sniff_compression(&mut file)?;
    let reader = BufReader::new(file);

    match compression {
        Compression::Bzip2 => {
            unpack_entries(tar::Archive::new(BzDecoder::new(reader)), destination)
        }
        Compression::Gzip => {
            unpack_entries(tar::Archive::new(GzDecoder::new(reader)), destination)
        }
        Compression::Plain => unpack_entries(tar::Archive::new(reader), destination),
    }
}

fn unpack_entries<R: Read>(mut archive: tar::Archive<R>, destination: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let size = entry.header().size()?;
        let path = entry.path()?.into_owned();
        if !entry.unpack_in(destination)? {
            warn!(member = %path.display(), "skipping archive member outside destination");
            continue;
        }
        total += size;
    }
    debug!(destination = %destination.display(), bytes = total, "sandbox extracted");
    Ok(total)
}

fn sniff_compression(file: &mut File) -> io::Result<Compression> {
    let mut magic = [0u8; 3];
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..])? {
            0 => break,
            n => read += n,
        }
    }
    file.seek(SeekFrom::Start(0))?;

    Ok(match &magic[..read] {
        [b'B', b'Z', b'h'] => Compression::Bzip2,
        [0x1f, 0x8b, ..] => Compression::Gzip,
        _ => Compression::Plain,
    })
}
