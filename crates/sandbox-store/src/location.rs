//! Sandbox location descriptors.
//!
//! A stored sandbox is named by the backend holding it and its physical
//! name inside that backend:
//!
//! ```text
//! SB:<BackendId>|<PhysicalName>
//! ```
//!
//! The backend id is everything before the first `|`; the physical name is
//! everything after it and may itself contain `|`.

use std::fmt;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};

/// Literal prefix of every descriptor.
pub const LOCATION_PREFIX: &str = "SB:";

const SEPARATOR: char = '|';

/// A parsed `SB:<backend>|<physical name>` descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationDescriptor {
    backend_id: String,
    physical_name: String,
}

impl LocationDescriptor {
    /// Build a descriptor. The backend id must not contain `|`, otherwise the
    /// formatted string would not parse back to the same pair.
    pub fn new(
        backend_id: impl Into<String>,
        physical_name: impl Into<String>,
    ) -> StoreResult<Self> {
        let backend_id = backend_id.into();
        let physical_name = physical_name.into();
        if backend_id.contains(SEPARATOR) {
            return Err(StoreError::InvalidLocationFormat {
                location: format!(
                    "{}{}{}{}",
                    LOCATION_PREFIX, backend_id, SEPARATOR, physical_name
                ),
                reason: "backend id must not contain '|'".to_string(),
            });
        }
        Ok(Self {
            backend_id,
            physical_name,
        })
    }

    /// Parse a descriptor string.
    ///
    /// # Examples
    ///
    /// ```
    /// use sandbox_store::LocationDescriptor;
    ///
    /// let loc = LocationDescriptor::parse("SB:SandboxSE|/sb/ab/abcd.tar.bz2").unwrap();
    /// assert_eq!(loc.backend_id(), "SandboxSE");
    /// assert_eq!(loc.physical_name(), "/sb/ab/abcd.tar.bz2");
    ///
    /// assert!(LocationDescriptor::parse("SBSandboxSE|/sb/abcd.tar.bz2").is_err());
    /// ```
    pub fn parse(location: &str) -> StoreResult<Self> {
        let rest = location
            .strip_prefix(LOCATION_PREFIX)
            .ok_or_else(|| StoreError::InvalidLocationFormat {
                location: location.to_string(),
                reason: format!("must start with '{}'", LOCATION_PREFIX),
            })?;

        let (backend_id, physical_name) =
            rest.split_once(SEPARATOR)
                .ok_or_else(|| StoreError::InvalidLocationFormat {
                    location: location.to_string(),
                    reason: "missing '|' between backend and physical name".to_string(),
                })?;

        Ok(Self {
            backend_id: backend_id.to_string(),
            physical_name: physical_name.to_string(),
        })
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn physical_name(&self) -> &str {
        &self.physical_name
    }

    /// Base name of the physical name, used as the local file name on fetch.
    pub fn file_name(&self) -> &str {
        self.physical_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.physical_name)
    }

    pub fn into_parts(self) -> (String, String) {
        (self.backend_id, self.physical_name)
    }
}

impl fmt::Display for LocationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            LOCATION_PREFIX, self.backend_id, SEPARATOR, self.physical_name
        )
    }
}

impl FromStr for LocationDescriptor {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let loc = LocationDescriptor::parse("SB:ProductionSandboxSE|/SandBox/u/g/ab/abc.tar.bz2")
            .unwrap();
        assert_eq!(loc.backend_id(), "ProductionSandboxSE");
        assert_eq!(loc.physical_name(), "/SandBox/u/g/ab/abc.tar.bz2");
        assert_eq!(loc.file_name(), "abc.tar.bz2");
    }

    #[test]
    fn test_physical_name_keeps_extra_separators() {
        let loc = LocationDescriptor::parse("SB:SE|a|b|c").unwrap();
        assert_eq!(loc.backend_id(), "SE");
        assert_eq!(loc.physical_name(), "a|b|c");
    }

    #[test]
    fn test_missing_colon_rejected() {
        let err = LocationDescriptor::parse("SBSEName|path").unwrap_err();
        assert!(matches!(err, StoreError::InvalidLocationFormat { .. }));
    }

    #[test]
    fn test_missing_separator_rejected() {
        let err = LocationDescriptor::parse("SB:SENamepath").unwrap_err();
        assert!(matches!(err, StoreError::InvalidLocationFormat { .. }));
    }

    #[test]
    fn test_prefix_must_be_at_start() {
        assert!(LocationDescriptor::parse(" SB:SE|x").is_err());
        assert!(LocationDescriptor::parse("xSB:SE|x").is_err());
    }

    #[test]
    fn test_format_parse_roundtrip() {
        let cases = [
            ("SE", "/path/file.tar.bz2"),
            ("SE-2", "with|pipes|inside"),
            ("", "empty-backend"),
            ("SE", ""),
            ("SE", "SB:looks|like|a|descriptor"),
        ];
        for (backend, pfn) in cases {
            let formatted = LocationDescriptor::new(backend, pfn).unwrap().to_string();
            let parsed = LocationDescriptor::parse(&formatted).unwrap();
            assert_eq!(parsed.into_parts(), (backend.to_string(), pfn.to_string()));
        }
    }

    #[test]
    fn test_backend_with_separator_rejected() {
        let err = LocationDescriptor::new("SE|x", "/p").unwrap_err();
        assert!(matches!(err, StoreError::InvalidLocationFormat { .. }));
    }
}
