//! Core sandbox types: inputs, sandbox types, entity keys and assignments.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::location::LocationDescriptor;

/// In-archive name used for in-memory text inputs.
pub const JOB_DESCRIPTION_NAME: &str = "jobDescription.xml";

/// One element of a sandbox upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxInput {
    /// File or directory on disk, stored under its base name.
    LocalPath(PathBuf),
    /// Text stored as [`JOB_DESCRIPTION_NAME`].
    InMemoryText(String),
}

impl SandboxInput {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::LocalPath(path.into())
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::InMemoryText(content.into())
    }
}

/// Relation between a sandbox and the entity owning it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SandboxType {
    Input,
    Output,
}

impl SandboxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::Output => "Output",
        }
    }
}

impl fmt::Display for SandboxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SandboxType {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        match s {
            "Input" => Ok(Self::Input),
            "Output" => Ok(Self::Output),
            other => Err(StoreError::InvalidSandboxType {
                value: other.to_string(),
            }),
        }
    }
}

/// Key of an entity in the assignment registry.
///
/// Formatted as `Job:<id>` or `Pilot:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityId {
    Job(String),
    Pilot(String),
}

impl EntityId {
    pub fn job(id: impl fmt::Display) -> Self {
        Self::Job(id.to_string())
    }

    pub fn pilot(id: impl fmt::Display) -> Self {
        Self::Pilot(id.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(id) => write!(f, "Job:{}", id),
            Self::Pilot(id) => write!(f, "Pilot:{}", id),
        }
    }
}

impl FromStr for EntityId {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        let invalid = || StoreError::InvalidEntityId {
            value: s.to_string(),
        };
        let (tag, id) = s.split_once(':').ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }
        match tag {
            "Job" => Ok(Self::Job(id.to_string())),
            "Pilot" => Ok(Self::Pilot(id.to_string())),
            _ => Err(invalid()),
        }
    }
}

/// Normalized list of entities for bulk operations.
///
/// Built from a single id or any collection of ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityList(pub Vec<EntityId>);

impl EntityList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[EntityId] {
        &self.0
    }
}

impl From<EntityId> for EntityList {
    fn from(id: EntityId) -> Self {
        Self(vec![id])
    }
}

impl From<Vec<EntityId>> for EntityList {
    fn from(ids: Vec<EntityId>) -> Self {
        Self(ids)
    }
}

impl From<&[EntityId]> for EntityList {
    fn from(ids: &[EntityId]) -> Self {
        Self(ids.to_vec())
    }
}

/// Owner credentials attached to an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
    pub group: String,
}

impl Owner {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Both name and group are set.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.group.is_empty()
    }
}

/// A sandbox location together with its relation to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxAssignment {
    pub location: LocationDescriptor,
    pub sb_type: SandboxType,
}

impl SandboxAssignment {
    pub fn new(location: LocationDescriptor, sb_type: SandboxType) -> Self {
        Self { location, sb_type }
    }

    /// Parse a `("SB:<backend>|<pfn>", "<type>")` pair.
    pub fn parse(location: &str, sb_type: &str) -> StoreResult<Self> {
        let sb_type = sb_type.parse()?;
        let location = LocationDescriptor::parse(location)?;
        Ok(Self { location, sb_type })
    }

    /// Parse every pair, failing on the first invalid one before anything
    /// is returned to the caller.
    pub fn parse_list<L, T>(pairs: &[(L, T)]) -> StoreResult<Vec<Self>>
    where
        L: AsRef<str>,
        T: AsRef<str>,
    {
        pairs
            .iter()
            .map(|(location, sb_type)| Self::parse(location.as_ref(), sb_type.as_ref()))
            .collect()
    }
}

/// Entities a freshly uploaded sandbox should be assigned to.
pub type AssignmentHint = BTreeMap<EntityId, SandboxType>;

/// Assignments for several entities, as sent to the assignment service.
pub type EntityAssignments = BTreeMap<EntityId, Vec<SandboxAssignment>>;

/// Resolved view of an entity: locations per type, in assignment order.
pub type SandboxesByType = BTreeMap<SandboxType, Vec<LocationDescriptor>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_type_closed_set() {
        assert_eq!("Input".parse::<SandboxType>().unwrap(), SandboxType::Input);
        assert_eq!("Output".parse::<SandboxType>().unwrap(), SandboxType::Output);

        let err = "Bogus".parse::<SandboxType>().unwrap_err();
        assert!(matches!(err, StoreError::InvalidSandboxType { ref value } if value == "Bogus"));
        // Case matters at the boundary
        assert!("input".parse::<SandboxType>().is_err());
    }

    #[test]
    fn test_entity_id_format() {
        assert_eq!(EntityId::job(42).to_string(), "Job:42");
        assert_eq!(EntityId::pilot("abc").to_string(), "Pilot:abc");
        assert_eq!("Job:42".parse::<EntityId>().unwrap(), EntityId::job(42));
        assert_eq!(
            "Pilot:p-1".parse::<EntityId>().unwrap(),
            EntityId::pilot("p-1")
        );
    }

    #[test]
    fn test_entity_id_rejects_unknown_tags() {
        for bad in ["Task:1", "Job:", "Job42", ""] {
            assert!(
                matches!(bad.parse::<EntityId>(), Err(StoreError::InvalidEntityId { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_entity_list_normalization() {
        let single: EntityList = EntityId::job(1).into();
        assert_eq!(single.as_slice(), &[EntityId::job(1)]);

        let many: EntityList = vec![EntityId::job(1), EntityId::pilot(2)].into();
        assert_eq!(many.as_slice().len(), 2);
    }

    #[test]
    fn test_parse_list_fails_on_any_bad_type() {
        let pairs = [("SB:SE|/a.tar.bz2", "Input"), ("SB:SE|/b.tar.bz2", "Bogus")];
        let err = SandboxAssignment::parse_list(&pairs).unwrap_err();
        assert!(matches!(err, StoreError::InvalidSandboxType { .. }));
    }

    #[test]
    fn test_owner_completeness() {
        assert!(Owner::new("alice", "users").is_complete());
        assert!(!Owner::new("alice", "").is_complete());
        assert!(!Owner::new("", "users").is_complete());
    }
}
