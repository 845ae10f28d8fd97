//! On-disk descriptor cache
//!
//! Parsed descriptors are stored as one RON file per MCU. An entry is only
//! used while its version stamp is at least that of the part description it
//! was built from and the correction tables it was built with are unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use super::types::McuDescriptor;
use super::DescriptorError;

/// One cached descriptor with the fingerprint of its correction tables
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CacheEntry {
    fixups: u64,
    descriptor: McuDescriptor,
}

/// Directory of cached descriptors
#[derive(Debug, Clone)]
pub struct DescriptorCache {
    dir: PathBuf,
}

impl DescriptorCache {
    /// Use `dir` as cache directory (created on first store)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, mcu_id: &str) -> PathBuf {
        self.dir.join(format!("{}.ron", mcu_id))
    }

    /// Load a cached descriptor that is at least as new as `min_version`
    /// and was built with the correction tables identified by `fixups`
    ///
    /// Returns `Ok(None)` when there is no entry or the entry is stale.
    pub fn load(
        &self,
        mcu_id: &str,
        min_version: u32,
        fixups: u64,
    ) -> Result<Option<McuDescriptor>, DescriptorError> {
        let path = self.path_for(mcu_id);
        if !path.is_file() {
            log::debug!("Descriptor cache miss for {}", mcu_id);
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let CacheEntry {
            fixups: built_with,
            descriptor,
        } = ron::from_str(&content)?;
        if built_with != fixups {
            log::debug!(
                "Cached descriptor for {} was built with other fixups",
                mcu_id
            );
            return Ok(None);
        }
        if descriptor.version < min_version {
            log::debug!(
                "Cached descriptor for {} is stale ({} < {})",
                mcu_id,
                descriptor.version,
                min_version
            );
            return Ok(None);
        }

        log::debug!("Descriptor cache hit for {}", mcu_id);
        Ok(Some(descriptor))
    }

    /// Store a descriptor under its MCU id
    pub fn store(&self, descriptor: &McuDescriptor, fixups: u64) -> Result<(), DescriptorError> {
        fs::create_dir_all(&self.dir)?;
        let entry = CacheEntry {
            fixups,
            descriptor: descriptor.clone(),
        };
        let content = ron::ser::to_string_pretty(&entry, ron::ser::PrettyConfig::default())?;
        fs::write(self.path_for(&descriptor.mcu_id), content)?;
        Ok(())
    }

    /// Remove the entry of one MCU, if any
    pub fn invalidate(&self, mcu_id: &str) -> Result<(), DescriptorError> {
        let path = self.path_for(mcu_id);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{parse_str, Fixups};

    const ATMEGA16: &str = include_str!("../../testdata/ATmega16.atdf");

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DescriptorCache::new(dir.path().join("cache"));
        let fixups = Fixups::builtin();
        let fingerprint = fixups.fingerprint();
        let desc = parse_str(ATMEGA16, 20240101, &fixups).unwrap();

        assert!(cache.load("atmega16", 0, fingerprint).unwrap().is_none());
        cache.store(&desc, fingerprint).unwrap();

        let loaded = cache.load("atmega16", 20240101, fingerprint).unwrap().unwrap();
        assert_eq!(loaded, desc);

        // A newer source makes the entry stale
        assert!(cache.load("atmega16", 20250101, fingerprint).unwrap().is_none());

        // So do different correction tables
        assert!(cache
            .load("atmega16", 0, Fixups::default().fingerprint())
            .unwrap()
            .is_none());

        cache.invalidate("atmega16").unwrap();
        assert!(cache.load("atmega16", 0, fingerprint).unwrap().is_none());
    }
}
