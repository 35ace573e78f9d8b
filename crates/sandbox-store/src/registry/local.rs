//! Assignment handle served from a locally held metadata database.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::metadata_db::MetadataDb;
use super::{group_by_type, AssignmentHandle};
use crate::error::StoreResult;
use crate::types::{EntityAssignments, EntityId, Owner, SandboxesByType};

/// Direct access to a [`MetadataDb`], bypassing the service.
#[derive(Debug, Clone)]
pub struct LocalHandle {
    db: Arc<MetadataDb>,
}

impl LocalHandle {
    pub fn new(db: Arc<MetadataDb>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<MetadataDb> {
        &self.db
    }
}

#[async_trait]
impl AssignmentHandle for LocalHandle {
    async fn assign_sandboxes_to_entities(
        &self,
        assignments: &EntityAssignments,
        owner: Option<&Owner>,
    ) -> StoreResult<()> {
        debug!(entities = assignments.len(), "assigning sandboxes through metadata db");
        let assignments = assignments.clone();
        let owner = owner.cloned();
        self.db
            .blocking(move |db| db.assign(&assignments, owner.as_ref()))
            .await
    }

    async fn unassign_entities(&self, entities: &[EntityId]) -> StoreResult<()> {
        let entities = entities.to_vec();
        self.db.blocking(move |db| db.unassign(&entities)).await
    }

    async fn sandboxes_assigned_to_entity(
        &self,
        entity: &EntityId,
    ) -> StoreResult<SandboxesByType> {
        let key = entity.clone();
        let assignments = self.db.blocking(move |db| db.assignments_for(&key)).await?;
        group_by_type(entity, assignments)
    }
}
