//! Assignment handle backed by the remote sandbox store service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{group_by_type, AssignmentHandle};
use crate::error::StoreResult;
use crate::transfer::with_timeout;
use crate::types::{EntityAssignments, EntityId, Owner, SandboxAssignment, SandboxesByType};

/// Assignment calls exposed by the remote sandbox store service.
///
/// `get_sandboxes_assigned_to_entity` returns an empty list for an entity
/// without assignments.
#[async_trait]
pub trait SandboxStoreRpc: Send + Sync {
    async fn assign_sandboxes_to_entities(
        &self,
        assignments: &EntityAssignments,
        owner: Option<&Owner>,
    ) -> StoreResult<()>;

    async fn unassign_entities(&self, entities: &[EntityId]) -> StoreResult<()>;

    async fn get_sandboxes_assigned_to_entity(
        &self,
        entity: &EntityId,
    ) -> StoreResult<Vec<SandboxAssignment>>;
}

/// Forwards assignment calls to a [`SandboxStoreRpc`] under a time budget.
#[derive(Clone)]
pub struct RemoteHandle {
    rpc: Arc<dyn SandboxStoreRpc>,
    timeout: Duration,
}

impl RemoteHandle {
    pub fn new(rpc: Arc<dyn SandboxStoreRpc>, timeout: Duration) -> Self {
        Self { rpc, timeout }
    }
}

impl std::fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AssignmentHandle for RemoteHandle {
    async fn assign_sandboxes_to_entities(
        &self,
        assignments: &EntityAssignments,
        owner: Option<&Owner>,
    ) -> StoreResult<()> {
        debug!(entities = assignments.len(), "assigning sandboxes through service");
        with_timeout(
            self.timeout,
            "assignSandboxesToEntities",
            self.rpc.assign_sandboxes_to_entities(assignments, owner),
        )
        .await
    }

    async fn unassign_entities(&self, entities: &[EntityId]) -> StoreResult<()> {
        with_timeout(
            self.timeout,
            "unassignEntities",
            self.rpc.unassign_entities(entities),
        )
        .await
    }

    async fn sandboxes_assigned_to_entity(
        &self,
        entity: &EntityId,
    ) -> StoreResult<SandboxesByType> {
        let assignments = with_timeout(
            self.timeout,
            "getSandboxesAssignedToEntity",
            self.rpc.get_sandboxes_assigned_to_entity(entity),
        )
        .await?;
        group_by_type(entity, assignments)
    }
}
