//! Sandbox bundle writer.
//!
//! A bundle is a bzip2-compressed tar archive holding every input of one
//! upload. Local paths are stored under their base name (directories
//! recursively), in-memory text under `jobDescription.xml`.
//!
//! # Determinism
//!
//! Headers are normalized (mtime 0, uid/gid 0, fixed modes) and directory
//! trees are walked in file-name order, so the same inputs with the same
//! bytes produce the same archive and therefore the same digest.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bzip2::write::BzEncoder;
use bzip2::Compression;
use tar::{Builder, EntryType, Header};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::digest::{BundleDigest, BUNDLE_SUFFIX};
use crate::error::{StoreError, StoreResult};
use crate::types::{SandboxInput, JOB_DESCRIPTION_NAME};

/// Prefix of upload staging files.
pub const STAGING_FILE_PREFIX: &str = "LDSB.";

/// Builds sandbox archives into fresh staging files.
#[derive(Debug, Clone, Default)]
pub struct SandboxBundler {
    staging_dir: Option<PathBuf>,
}

/// A finished archive waiting for transfer.
///
/// The staging file is deleted when this value is dropped, unless
/// [`StagedBundle::keep`] is called.
#[derive(Debug)]
pub struct StagedBundle {
    file: NamedTempFile,
    size: u64,
}

/// Input after validation, with its resolved archive name.
struct PlannedEntry<'a> {
    name: String,
    source: PlannedSource<'a>,
}

enum PlannedSource<'a> {
    Disk(PathBuf),
    Text(&'a str),
}

impl SandboxBundler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage archives in `dir` instead of the system temp directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Validate `inputs` and write them into a new staging archive.
    ///
    /// # Errors
    ///
    /// - `MissingLocalFile` naming every path that does not exist
    /// - `UnsupportedInputType` for sockets, fifos and devices
    /// - `InvalidInputCollection` for duplicate or empty archive names
    /// - `TempAllocationFailed` when no staging file can be created
    /// - `ArchiveWriteFailed` on any write error (nothing is left behind)
    pub fn build(&self, inputs: &[SandboxInput]) -> StoreResult<StagedBundle> {
        let plan = plan_entries(inputs)?;

        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_FILE_PREFIX).suffix(BUNDLE_SUFFIX);
        let file = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| StoreError::TempAllocationFailed {
            message: e.to_string(),
        })?;

        write_archive(file.as_file(), &plan).map_err(|e| StoreError::ArchiveWriteFailed {
            message: e.to_string(),
        })?;

        let size = file
            .as_file()
            .metadata()
            .map_err(|e| StoreError::ArchiveWriteFailed {
                message: format!("cannot stat staging archive: {}", e),
            })?
            .len();

        debug!(
            path = %file.path().display(),
            entries = plan.len(),
            size,
            "sandbox archive staged"
        );

        Ok(StagedBundle { file, size })
    }
}

impl StagedBundle {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Compressed size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digest(&self) -> StoreResult<BundleDigest> {
        BundleDigest::from_path(self.path()).map_err(|e| StoreError::Io {
            message: format!("cannot read staging archive {}: {}", self.path().display(), e),
        })
    }

    /// Detach the staging file from automatic cleanup and return its path.
    pub fn keep(self) -> StoreResult<PathBuf> {
        self.file
            .keep()
            .map(|(_, path)| path)
            .map_err(|e| StoreError::Io {
                message: format!("cannot keep staging archive: {}", e),
            })
    }

    /// Delete the staging file, logging instead of failing.
    pub fn close(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            warn!(path = %path.display(), error = %e, "could not remove staging archive");
        }
    }
}

fn plan_entries(inputs: &[SandboxInput]) -> StoreResult<Vec<PlannedEntry<'_>>> {
    let missing: Vec<PathBuf> = inputs
        .iter()
        .filter_map(|input| match input {
            SandboxInput::LocalPath(path) if !path.exists() => Some(path.clone()),
            _ => None,
        })
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::MissingLocalFile { paths: missing });
    }

    let mut plan = Vec::with_capacity(inputs.len());
    for input in inputs {
        match input {
            SandboxInput::LocalPath(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| StoreError::InvalidInputCollection {
                        reason: format!("{} has no base name", path.display()),
                    })?;
                let real = fs::canonicalize(path).map_err(|e| StoreError::Io {
                    message: format!("cannot resolve {}: {}", path.display(), e),
                })?;
                let file_type = fs::metadata(&real)
                    .map_err(|e| StoreError::Io {
                        message: format!("cannot stat {}: {}", real.display(), e),
                    })?
                    .file_type();
                if !file_type.is_file() && !file_type.is_dir() {
                    return Err(StoreError::UnsupportedInputType {
                        path: path.clone(),
                        kind: describe_file_type(&file_type).to_string(),
                    });
                }
                plan.push(PlannedEntry {
                    name,
                    source: PlannedSource::Disk(real),
                });
            }
            SandboxInput::InMemoryText(text) => plan.push(PlannedEntry {
                name: JOB_DESCRIPTION_NAME.to_string(),
                source: PlannedSource::Text(text),
            }),
        }
    }

    let mut seen = HashSet::new();
    for entry in &plan {
        if !seen.insert(entry.name.as_str()) {
            return Err(StoreError::InvalidInputCollection {
                reason: format!("duplicate archive name '{}'", entry.name),
            });
        }
    }

    Ok(plan)
}

fn write_archive(file: &File, plan: &[PlannedEntry<'_>]) -> io::Result<()> {
    let encoder = BzEncoder::new(BufWriter::new(file), Compression::best());
    let mut tar = Builder::new(encoder);
    tar.mode(tar::HeaderMode::Deterministic);

    for entry in plan {
        match &entry.source {
            PlannedSource::Disk(real) => append_tree(&mut tar, real, &entry.name)?,
            PlannedSource::Text(text) => {
                let mut header = base_header(EntryType::Regular, 0o644);
                header.set_size(text.len() as u64);
                tar.append_data(&mut header, &entry.name, text.as_bytes())?;
            }
        }
    }

    let encoder = tar.into_inner()?;
    let mut out = encoder.finish()?;
    out.flush()?;
    Ok(())
}

/// Append `root` (file or directory) under `name`, walking directories in
/// file-name order. Nested symlinks are stored as links, not followed.
fn append_tree<W: Write>(tar: &mut Builder<W>, root: &Path, name: &str) -> io::Result<()> {
    for item in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let item = item.map_err(io::Error::from)?;
        let rel = item
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let archive_name = archive_path(name, rel);
        let file_type = item.file_type();

        if file_type.is_dir() {
            let mut header = base_header(EntryType::Directory, 0o755);
            header.set_size(0);
            tar.append_data(&mut header, &archive_name, io::empty())?;
        } else if file_type.is_file() {
            let meta = item.metadata().map_err(io::Error::from)?;
            let mut header = base_header(EntryType::Regular, file_mode(&meta));
            header.set_size(meta.len());
            tar.append_data(&mut header, &archive_name, File::open(item.path())?)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(item.path())?;
            let mut header = base_header(EntryType::Symlink, 0o777);
            header.set_size(0);
            tar.append_link(&mut header, &archive_name, &target)?;
        } else {
            debug!(path = %item.path().display(), "skipping special file in sandbox tree");
        }
    }
    Ok(())
}

fn archive_path(name: &str, rel: &Path) -> String {
    let mut out = name.to_string();
    for component in rel.components() {
        out.push('/');
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}

fn base_header(entry_type: EntryType, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if meta.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn file_mode(_meta: &fs::Metadata) -> u32 {
    0o644
}

fn describe_file_type(file_type: &fs::FileType) -> &'static str {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_socket() {
            return "socket";
        }
        if file_type.is_fifo() {
            return "fifo";
        }
        if file_type.is_block_device() || file_type.is_char_device() {
            return "device";
        }
    }
    let _ = file_type;
    "special file"
}
