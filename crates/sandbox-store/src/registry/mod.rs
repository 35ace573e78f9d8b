//! Entity → sandbox assignment registry.
//!
//! Assignments normally go through the sandbox store service. Trusted
//! in-process callers may also hold the metadata database directly; the
//! registry then serves owner-qualified `assign` calls locally. Both paths
//! implement [`AssignmentHandle`] and return the same errors.
//!
//! Direct access is resolved once, when the registry is built. If opening
//! the database fails, the registry stays on the remote path for its whole
//! lifetime and reports it through [`AssignmentRegistry::direct_access`].

pub mod local;
pub mod metadata_db;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

pub use local::LocalHandle;
pub use metadata_db::MetadataDb;
pub use remote::{RemoteHandle, SandboxStoreRpc};

use crate::error::{StoreError, StoreResult};
use crate::location::LocationDescriptor;
use crate::types::{
    EntityAssignments, EntityId, EntityList, Owner, SandboxAssignment, SandboxType,
    SandboxesByType,
};

/// Operations every assignment backend provides.
#[async_trait]
pub trait AssignmentHandle: Send + Sync {
    async fn assign_sandboxes_to_entities(
        &self,
        assignments: &EntityAssignments,
        owner: Option<&Owner>,
    ) -> StoreResult<()>;

    async fn unassign_entities(&self, entities: &[EntityId]) -> StoreResult<()>;

    /// `EntityNotFound` when the entity has no assignments.
    async fn sandboxes_assigned_to_entity(
        &self,
        entity: &EntityId,
    ) -> StoreResult<SandboxesByType>;
}

/// How the registry may reach the metadata database directly.
#[derive(Debug, Clone, Default)]
pub enum DirectAccess {
    /// Always use the service.
    #[default]
    Disabled,
    /// Open the database at this URL (`memory://`, `file://...`).
    Open(String),
    /// Use an already open database.
    Shared(Arc<MetadataDb>),
    /// Opening the database already failed with this reason.
    Unavailable(String),
}

/// Outcome of resolving [`DirectAccess`], for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectAccessStatus {
    Disabled,
    Active,
    /// Opening the database failed; the remote path is used instead.
    FellBack { reason: String },
}

#[derive(Debug)]
enum DirectState {
    Disabled,
    Active(LocalHandle),
    FellBack(String),
}

impl DirectState {
    fn resolve(direct: DirectAccess) -> Self {
        match direct {
            DirectAccess::Disabled => Self::Disabled,
            DirectAccess::Shared(db) => Self::Active(LocalHandle::new(db)),
            DirectAccess::Unavailable(reason) => Self::FellBack(reason),
            DirectAccess::Open(url) => match MetadataDb::open(&url) {
                Ok(db) => {
                    info!(url = %url, "direct metadata access enabled");
                    Self::Active(LocalHandle::new(Arc::new(db)))
                }
                Err(e) => {
                    warn!(
                        url = %url,
                        error = %e,
                        "direct metadata access unavailable, using the sandbox store service"
                    );
                    Self::FellBack(e.to_string())
                }
            },
        }
    }
}

/// Associates sandboxes with jobs and pilots.
#[derive(Debug)]
pub struct AssignmentRegistry {
    remote: RemoteHandle,
    direct: DirectState,
}

impl AssignmentRegistry {
    pub fn new(remote: RemoteHandle, direct: DirectAccess) -> Self {
        Self {
            remote,
            direct: DirectState::resolve(direct),
        }
    }

    pub fn direct_access(&self) -> DirectAccessStatus {
        match &self.direct {
            DirectState::Disabled => DirectAccessStatus::Disabled,
            DirectState::Active(_) => DirectAccessStatus::Active,
            DirectState::FellBack(reason) => DirectAccessStatus::FellBack {
                reason: reason.clone(),
            },
        }
    }

    /// True when direct access was requested but could not be set up.
    pub fn is_fallback(&self) -> bool {
        matches!(self.direct, DirectState::FellBack(_))
    }

    /// Assign sandboxes to `entity`.
    ///
    /// Served from the local database when direct access is active and a
    /// complete owner is given; otherwise through the service.
    pub async fn assign(
        &self,
        entity: &EntityId,
        sandboxes: &[SandboxAssignment],
        owner: Option<&Owner>,
    ) -> StoreResult<()> {
        let mut assignments = EntityAssignments::new();
        assignments.insert(entity.clone(), sandboxes.to_vec());
        let owner = owner.filter(|o| o.is_complete());

        match (&self.direct, owner) {
            (DirectState::Active(local), Some(owner)) => {
                local
                    .assign_sandboxes_to_entities(&assignments, Some(owner))
                    .await
            }
            _ => {
                self.remote
                    .assign_sandboxes_to_entities(&assignments, owner)
                    .await
            }
        }
    }

    /// Parse every `(location, type)` pair, then assign. Nothing is sent if
    /// any pair is invalid.
    pub async fn assign_raw<L, T>(
        &self,
        entity: &EntityId,
        pairs: &[(L, T)],
        owner: Option<&Owner>,
    ) -> StoreResult<()>
    where
        L: AsRef<str> + Sync,
        T: AsRef<str> + Sync,
    {
        let sandboxes = SandboxAssignment::parse_list(pairs)?;
        self.assign(entity, &sandboxes, owner).await
    }

    /// Remove all assignments of one or more entities. Unknown entities are
    /// not an error.
    pub async fn unassign(&self, entities: impl Into<EntityList>) -> StoreResult<()> {
        let entities = entities.into();
        if entities.is_empty() {
            return Ok(());
        }
        debug!(count = entities.as_slice().len(), "unassigning entities");
        self.remote.unassign_entities(entities.as_slice()).await
    }

    /// All sandboxes of `entity`, grouped by type in assignment order.
    pub async fn resolve(&self, entity: &EntityId) -> StoreResult<SandboxesByType> {
        self.remote.sandboxes_assigned_to_entity(entity).await
    }

    /// Sandboxes of one type. `NoSandboxOfType` if the entity has none.
    pub async fn resolve_type(
        &self,
        entity: &EntityId,
        sb_type: SandboxType,
    ) -> StoreResult<Vec<LocationDescriptor>> {
        let mut by_type = self.resolve(entity).await?;
        by_type
            .remove(&sb_type)
            .filter(|locations| !locations.is_empty())
            .ok_or_else(|| StoreError::NoSandboxOfType {
                entity: entity.to_string(),
                sb_type: sb_type.to_string(),
            })
    }
}

/// Group an entity's assignments by type, keeping order.
pub(crate) fn group_by_type(
    entity: &EntityId,
    assignments: Vec<SandboxAssignment>,
) -> StoreResult<SandboxesByType> {
    if assignments.is_empty() {
        return Err(StoreError::EntityNotFound {
            entity: entity.to_string(),
        });
    }
    let mut by_type = SandboxesByType::new();
    for sb in assignments {
        by_type.entry(sb.sb_type).or_default().push(sb.location);
    }
    Ok(by_type)
}
