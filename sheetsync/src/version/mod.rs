//! Per-artifact version counters backing the remote `version.txt` manifest.
//!
//! The manifest format is `key_version/key_version/.../`. Requesting the next
//! version of an artifact only marks it dirty; the counter is bumped once,
//! when the registry is serialized for publishing.

use crate::error::{Result, SheetSyncError};
use std::collections::BTreeMap;

/// Version state of one published artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactVersion {
    pub key: String,
    /// -1 for an artifact that has never been published.
    pub version: i64,
    pub dirty: bool,
}

impl ArtifactVersion {
    pub fn new(key: impl Into<String>, version: i64) -> Self {
        ArtifactVersion {
            key: key.into(),
            version,
            dirty: false,
        }
    }

    /// The version-qualified name of the next version, e.g. `Items_4`.
    pub fn next_name(&self) -> String {
        format!("{}_{}", self.key, self.version + 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRegistry {
    entries: BTreeMap<String, ArtifactVersion>,
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with a fresh, never-published entry per key.
    pub fn bootstrap<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = VersionRegistry::new();
        for key in keys {
            registry.get_or_create(key.as_ref());
        }
        registry
    }

    /// Build a registry from a manifest payload.
    pub fn from_manifest(payload: &str) -> Result<Self> {
        let mut registry = VersionRegistry::new();
        registry.parse(payload)?;
        Ok(registry)
    }

    pub fn get_or_create(&mut self, key: &str) -> &mut ArtifactVersion {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| ArtifactVersion::new(key, -1))
    }

    pub fn get(&self, key: &str) -> Option<&ArtifactVersion> {
        self.entries.get(key)
    }

    /// Name of the version the next publish will produce for `key`.
    ///
    /// Marks the entry dirty without touching its counter, so repeated calls
    /// before [`serialize`](Self::serialize) all return the same name and
    /// consume a single version. Unknown keys are created first.
    pub fn preview_next(&mut self, key: &str) -> String {
        let entry = self.get_or_create(key);
        entry.dirty = true;
        entry.next_name()
    }

    /// Merge a manifest payload into the registry.
    ///
    /// Every non-empty `/`-separated segment must be `key_version`; parsed
    /// entries overwrite existing ones and are clean. A segment that cannot be
    /// parsed fails the whole call and leaves the registry untouched.
    pub fn parse(&mut self, payload: &str) -> Result<()> {
        let mut parsed = Vec::new();
        for segment in payload.trim().split('/') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (key, version) =
                segment
                    .rsplit_once('_')
                    .ok_or_else(|| SheetSyncError::VersionParse {
                        segment: segment.to_string(),
                    })?;
            let version: i64 = version.parse().map_err(|_| SheetSyncError::VersionParse {
                segment: segment.to_string(),
            })?;
            if key.is_empty() {
                return Err(SheetSyncError::VersionParse {
                    segment: segment.to_string(),
                });
            }
            parsed.push(ArtifactVersion::new(key, version));
        }

        for entry in parsed {
            self.entries.insert(entry.key.clone(), entry);
        }
        Ok(())
    }

    /// Apply deferred bumps and emit the manifest payload.
    pub fn serialize(&mut self) -> String {
        let mut out = String::new();
        for entry in self.entries.values_mut() {
            if entry.dirty {
                entry.version += 1;
                entry.dirty = false;
            }
            out.push_str(&format!("{}_{}/", entry.key, entry.version));
        }
        out
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArtifactVersion> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_starts_unpublished() {
        let mut registry = VersionRegistry::new();
        let entry = registry.get_or_create("Items");
        assert_eq!(entry.version, -1);
        assert!(!entry.dirty);
        assert_eq!(entry.next_name(), "Items_0");
    }

    #[test]
    fn test_get_or_create_keeps_existing_entry() {
        let mut registry = VersionRegistry::from_manifest("Items_3/").unwrap();
        assert_eq!(registry.get_or_create("Items").version, 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_parse_ignores_empty_segments() {
        let registry = VersionRegistry::from_manifest("Items_2//Monsters_0/").unwrap();
        assert_eq!(registry.get("Items").unwrap().version, 2);
        assert_eq!(registry.get("Monsters").unwrap().version, 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_parse_accepts_underscores_in_keys() {
        let registry = VersionRegistry::from_manifest("drop_table_7/").unwrap();
        assert_eq!(registry.get("drop_table").unwrap().version, 7);
    }

    #[test]
    fn test_parse_rejects_segment_without_version() {
        let mut registry = VersionRegistry::from_manifest("Items_1/").unwrap();
        let err = registry.parse("Monsters_2/Broken/").unwrap_err();
        assert!(matches!(err, SheetSyncError::VersionParse { ref segment } if segment == "Broken"));
        // Nothing from the failed payload was applied.
        assert!(registry.get("Monsters").is_none());
        assert_eq!(registry.get("Items").unwrap().version, 1);
    }

    #[test]
    fn test_parse_rejects_non_numeric_version() {
        let err = VersionRegistry::from_manifest("Items_x/").unwrap_err();
        assert!(matches!(err, SheetSyncError::VersionParse { .. }));
    }

    #[test]
    fn test_parse_overwrites_and_clears_dirty() {
        let mut registry = VersionRegistry::new();
        registry.preview_next("Items");
        registry.parse("Items_5/").unwrap();
        let entry = registry.get("Items").unwrap();
        assert_eq!(entry.version, 5);
        assert!(!entry.dirty);
    }

    #[test]
    fn test_serialize_round_trips_clean_registry() {
        let payload = "Items_2/Monsters_0/Skills_11/";
        let mut registry = VersionRegistry::from_manifest(payload).unwrap();
        let serialized = registry.serialize();
        assert_eq!(
            VersionRegistry::from_manifest(&serialized).unwrap(),
            VersionRegistry::from_manifest(payload).unwrap()
        );
    }

    #[test]
    fn test_preview_many_times_bumps_once() {
        let mut registry = VersionRegistry::from_manifest("Items_2/").unwrap();
        assert_eq!(registry.preview_next("Items"), "Items_3");
        assert_eq!(registry.preview_next("Items"), "Items_3");
        assert_eq!(registry.preview_next("Items"), "Items_3");
        assert_eq!(registry.get("Items").unwrap().version, 2);

        assert_eq!(registry.serialize(), "Items_3/");
        // A second serialize has nothing left to bump.
        assert_eq!(registry.serialize(), "Items_3/");
    }

    #[test]
    fn test_preview_unknown_key_starts_at_zero() {
        let mut registry = VersionRegistry::new();
        assert_eq!(registry.preview_next("Fresh"), "Fresh_0");
        assert_eq!(registry.serialize(), "Fresh_0/");
    }

    #[test]
    fn test_only_dirty_entries_bump() {
        let mut registry = VersionRegistry::from_manifest("A_1/B_4/").unwrap();
        registry.preview_next("B");
        let reparsed = VersionRegistry::from_manifest(&registry.serialize()).unwrap();
        assert_eq!(reparsed.get("A").unwrap().version, 1);
        assert_eq!(reparsed.get("B").unwrap().version, 5);
    }

    #[test]
    fn test_bootstrap_creates_unpublished_entries() {
        let mut registry = VersionRegistry::bootstrap(["Items", "Monsters"]);
        assert_eq!(registry.serialize(), "Items_-1/Monsters_-1/");
    }
}
