//! Key naming for sandbox objects.
//!
//! ```text
//! {base_prefix}/sandboxes/{name[0..2]}/{name}     # e.g. .../5d/5d41...c592.tar.bz2
//! ```
//!
//! The physical name published in location descriptors is the key with a
//! leading `/`.

use object_store::path::Path;

/// Builder for storage keys.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    /// Base prefix (e.g., "wms/sandboxes")
    base_prefix: String,
}

impl KeyBuilder {
    /// Create a new key builder with the given base prefix.
    pub fn new(base_prefix: impl Into<String>) -> Self {
        let prefix = base_prefix.into().trim_matches('/').to_string();
        Self {
            base_prefix: prefix,
        }
    }

    /// Key for a sandbox archive, sharded by the first two name characters.
    pub fn sandbox_key(&self, canonical_name: &str) -> Path {
        let name = Self::sanitize_name(canonical_name);
        let shard: String = name.chars().take(2).collect();
        if self.base_prefix.is_empty() {
            Path::from(format!("sandboxes/{}/{}", shard, name))
        } else {
            Path::from(format!("{}/sandboxes/{}/{}", self.base_prefix, shard, name))
        }
    }

    /// Physical name (`/` + key) for a storage key.
    pub fn physical_name(key: &Path) -> String {
        format!("/{}", key.as_ref())
    }

    /// Storage key for a physical name taken from a descriptor.
    pub fn key_for_physical_name(physical_name: &str) -> Path {
        Path::from(physical_name.trim_start_matches('/'))
    }

    /// Replace characters that do not belong in an object key.
    fn sanitize_name(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}
