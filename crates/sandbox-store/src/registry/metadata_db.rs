//! Sandbox metadata database.
//!
//! Holds the entity → sandbox assignment table. Used directly by trusted
//! in-process callers and by the reference service.
//!
//! The methods are synchronous; a file-backed database writes under the
//! table lock. Async callers go through [`MetadataDb::blocking`].
//!
//! # Backends
//!
//! ```text
//! memory://                      # process-local table
//! file:///var/lib/sb/meta.json   # JSON file, replaced atomically on every change
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::location::LocationDescriptor;
use crate::transfer::StoreSpec;
use crate::types::{EntityAssignments, EntityId, Owner, SandboxAssignment, SandboxType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredAssignment {
    location: String,
    sb_type: SandboxType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<Owner>,
    assigned_at: DateTime<Utc>,
}

type Table = BTreeMap<String, Vec<StoredAssignment>>;

/// Entity → sandbox assignment table.
#[derive(Debug)]
pub struct MetadataDb {
    table: Mutex<Table>,
    path: Option<PathBuf>,
}

impl MetadataDb {
    pub fn in_memory() -> Self {
        Self {
            table: Mutex::new(Table::new()),
            path: None,
        }
    }

    /// Open a database from a `memory://` or `file://` URL.
    pub fn open(url: &str) -> StoreResult<Self> {
        let spec = StoreSpec::parse(url)?;
        match spec.scheme.as_str() {
            "memory" => Ok(Self::in_memory()),
            "file" => Self::open_file(spec.local_path()),
            scheme => Err(StoreError::InvalidSpec {
                spec: url.to_string(),
                reason: format!("unsupported metadata scheme: {}", scheme),
            }),
        }
    }

    /// Open (or create) a JSON-file database. The file is written once on
    /// open so an unwritable location fails here rather than on first use.
    pub fn open_file(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::metadata(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let table: Table = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                StoreError::metadata(format!("corrupt metadata file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Table::new(),
            Err(e) => {
                return Err(StoreError::metadata(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        write_table(&path, &table)?;
        debug!(path = %path.display(), entities = table.len(), "metadata database opened");

        Ok(Self {
            table: Mutex::new(table),
            path: Some(path),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append assignments. A (location, type) pair already recorded for an
    /// entity is moved to the end, so it becomes the most recent one.
    pub fn assign(
        &self,
        assignments: &EntityAssignments,
        owner: Option<&Owner>,
    ) -> StoreResult<()> {
        let now = Utc::now();
        self.update(|table| {
            for (entity, sandboxes) in assignments {
                let records = table.entry(entity.to_string()).or_default();
                for sb in sandboxes {
                    let location = sb.location.to_string();
                    records.retain(|r| !(r.location == location && r.sb_type == sb.sb_type));
                    records.push(StoredAssignment {
                        location,
                        sb_type: sb.sb_type,
                        owner: owner.cloned(),
                        assigned_at: now,
                    });
                }
                if records.is_empty() {
                    table.remove(&entity.to_string());
                }
            }
        })
    }

    /// Drop every record of the given entities. Unknown entities are ignored.
    pub fn unassign(&self, entities: &[EntityId]) -> StoreResult<()> {
        self.update(|table| {
            for entity in entities {
                table.remove(&entity.to_string());
            }
        })
    }

    /// Assignments of `entity` in assignment order; empty if it has none.
    pub fn assignments_for(&self, entity: &EntityId) -> StoreResult<Vec<SandboxAssignment>> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let Some(records) = table.get(&entity.to_string()) else {
            return Ok(Vec::new());
        };
        records
            .iter()
            .map(|r| {
                let location = LocationDescriptor::parse(&r.location).map_err(|e| {
                    StoreError::metadata(format!("corrupt record for {}: {}", entity, e))
                })?;
                Ok(SandboxAssignment::new(location, r.sb_type))
            })
            .collect()
    }

    /// Number of entities with at least one assignment.
    pub fn entity_count(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run `op` against the database from async code. File-backed
    /// databases run it on the blocking pool; memory ones in place.
    pub async fn blocking<T, F>(self: &Arc<Self>, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&MetadataDb) -> StoreResult<T> + Send + 'static,
    {
        if self.path.is_none() {
            return op(self);
        }
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StoreError::Other(anyhow!("metadata task failed: {}", e)))?
    }

    /// Apply `change` to a copy of the table, persist it, then publish it.
    /// A failed write leaves the table untouched.
    fn update(&self, change: impl FnOnce(&mut Table)) -> StoreResult<()> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = table.clone();
        change(&mut next);
        if let Some(path) = &self.path {
            write_table(path, &next)?;
        }
        *table = next;
        Ok(())
    }
}

impl Default for MetadataDb {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn write_table(path: &Path, table: &Table) -> StoreResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| StoreError::metadata(format!("cannot write in {}: {}", dir.display(), e)))?;
    serde_json::to_writer_pretty(&mut tmp, table)
        .map_err(|e| StoreError::metadata(format!("cannot serialize metadata: {}", e)))?;
    tmp.flush()
        .map_err(|e| StoreError::metadata(format!("cannot flush metadata: {}", e)))?;
    tmp.persist(path).map_err(|e| {
        StoreError::metadata(format!("cannot replace {}: {}", path.display(), e.error))
    })?;
    Ok(())
}
