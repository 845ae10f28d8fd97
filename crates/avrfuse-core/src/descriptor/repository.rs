//! Session-wide descriptor repository
//!
//! The repository knows where the part description of every MCU lives,
//! parses each one on first use and keeps the result until it is reloaded
//! explicitly. It is built once and handed to every consumer by reference.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::cache::DescriptorCache;
use super::fixups::Fixups;
use super::parser::{parse_str, version_stamp};
use super::types::McuDescriptor;
use super::DescriptorError;

/// File extensions recognised as part descriptions
const EXTENSIONS: &[&str] = &["atdf", "xml"];

/// Vendor spelling of common id prefixes, longest first
const NAME_PREFIXES: &[(&str, &str)] = &[
    ("atxmega", "ATxmega"),
    ("atmega", "ATmega"),
    ("attiny", "ATtiny"),
    ("at90", "AT90"),
    ("avr", "AVR"),
    ("at", "AT"),
];

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Inline { xml: String, version: u32 },
}

/// Lazily parsed descriptors, keyed by MCU id
#[derive(Debug)]
pub struct DescriptorRepository {
    sources: BTreeMap<String, Source>,
    fixups: Fixups,
    cache: Option<DescriptorCache>,
    /// `None` marks a part description that failed to parse
    loaded: RefCell<HashMap<String, Option<Arc<McuDescriptor>>>>,
}

impl Default for DescriptorRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorRepository {
    /// Create an empty repository using the built-in correction tables
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
            fixups: Fixups::builtin(),
            cache: None,
            loaded: RefCell::new(HashMap::new()),
        }
    }

    /// Add extra correction tables
    pub fn with_fixups(mut self, fixups: Fixups) -> Self {
        self.fixups.extend(fixups);
        self
    }

    /// Keep parsed descriptors in an on-disk cache
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache = Some(DescriptorCache::new(dir));
        self
    }

    /// Register every part description in a directory
    ///
    /// Returns the number of files found. The files are not parsed yet.
    pub fn add_dir(&mut self, dir: &Path) -> Result<usize, DescriptorError> {
        let mut total = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            let recognised = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)));
            if recognised && path.is_file() {
                self.add_file(&path);
                total += 1;
            }
        }

        log::debug!("Found {} part description(s) in {}", total, dir.display());
        Ok(total)
    }

    /// Register one part description file; the MCU id is the lower-cased
    /// file stem
    pub fn add_file(&mut self, path: &Path) {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            log::warn!("Ignoring part description with odd name: {}", path.display());
            return;
        };
        let id = stem.to_ascii_lowercase();
        self.loaded.get_mut().remove(&id);
        self.sources.insert(id, Source::File(path.to_path_buf()));
    }

    /// Register an in-memory part description
    pub fn add_xml(&mut self, mcu_id: &str, xml: impl Into<String>, version: u32) {
        let id = mcu_id.to_ascii_lowercase();
        self.loaded.get_mut().remove(&id);
        self.sources.insert(
            id,
            Source::Inline {
                xml: xml.into(),
                version,
            },
        );
    }

    /// All known MCU ids, sorted
    pub fn mcu_ids(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// Number of known MCUs
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if no part description is known
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Check whether an MCU id has a part description
    pub fn contains(&self, mcu_id: &str) -> bool {
        self.sources.contains_key(&mcu_id.to_ascii_lowercase())
    }

    /// Descriptor of an MCU, parsed on first use
    ///
    /// A part description that fails to parse is logged and skipped; the
    /// MCU then reports as unknown until it is reloaded.
    pub fn get(&self, mcu_id: &str) -> Result<Arc<McuDescriptor>, DescriptorError> {
        let id = mcu_id.to_ascii_lowercase();

        if let Some(entry) = self.loaded.borrow().get(&id) {
            return entry
                .clone()
                .ok_or_else(|| DescriptorError::UnknownMcu(mcu_id.to_string()));
        }

        let source = self
            .sources
            .get(&id)
            .ok_or_else(|| DescriptorError::UnknownMcu(mcu_id.to_string()))?;

        let entry = match self.load(&id, source) {
            Ok(desc) => Some(Arc::new(desc)),
            Err(e) => {
                log::warn!("Skipping part description for {}: {}", id, e);
                None
            }
        };
        self.loaded.borrow_mut().insert(id, entry.clone());
        entry.ok_or_else(|| DescriptorError::UnknownMcu(mcu_id.to_string()))
    }

    /// Parse every known part description now
    ///
    /// Returns the number of descriptors available afterwards.
    pub fn preload(&self) -> usize {
        self.sources
            .keys()
            .filter(|id| self.get(id).is_ok())
            .count()
    }

    /// Forget the parsed descriptor of one MCU and parse it again
    pub fn reload(&self, mcu_id: &str) -> Result<Arc<McuDescriptor>, DescriptorError> {
        let id = mcu_id.to_ascii_lowercase();
        self.loaded.borrow_mut().remove(&id);
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate(&id) {
                log::warn!("Failed to invalidate cached descriptor for {}: {}", id, e);
            }
        }
        self.get(&id)
    }

    /// Forget every parsed descriptor
    pub fn reload_all(&self) {
        let mut loaded = self.loaded.borrow_mut();
        if let Some(cache) = &self.cache {
            for id in loaded.keys() {
                if let Err(e) = cache.invalidate(id) {
                    log::warn!("Failed to invalidate cached descriptor for {}: {}", id, e);
                }
            }
        }
        loaded.clear();
    }

    /// Vendor spelling of an MCU id
    pub fn display_name(&self, mcu_id: &str) -> String {
        match self.get(mcu_id) {
            Ok(desc) => desc.name.clone(),
            Err(_) => Self::guess_display_name(mcu_id),
        }
    }

    /// Vendor spelling of an MCU id, derived from its prefix only
    pub fn guess_display_name(mcu_id: &str) -> String {
        let lower = mcu_id.to_ascii_lowercase();
        for (prefix, vendor) in NAME_PREFIXES {
            if let Some(rest) = lower.strip_prefix(prefix) {
                return format!("{}{}", vendor, rest.to_ascii_uppercase());
            }
        }
        mcu_id.to_string()
    }

    fn load(&self, id: &str, source: &Source) -> Result<McuDescriptor, DescriptorError> {
        let (xml, version) = match source {
            Source::File(path) => {
                let version = version_stamp(path)?;
                if let Some(desc) = self.cached(id, version) {
                    return Ok(desc);
                }
                (fs::read_to_string(path)?, version)
            }
            Source::Inline { xml, version } => {
                if let Some(desc) = self.cached(id, *version) {
                    return Ok(desc);
                }
                (xml.clone(), *version)
            }
        };

        let mut desc = parse_str(&xml, version, &self.fixups)?;
        if desc.mcu_id != id {
            log::debug!("{} describes device {}; keeping id {}", id, desc.name, id);
            desc.mcu_id = id.to_string();
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&desc, self.fixups.fingerprint()) {
                log::warn!("Failed to cache descriptor for {}: {}", id, e);
            }
        }
        Ok(desc)
    }

    fn cached(&self, id: &str, version: u32) -> Option<McuDescriptor> {
        let cache = self.cache.as_ref()?;
        match cache.load(id, version, self.fixups.fingerprint()) {
            Ok(desc) => desc,
            Err(e) => {
                log::warn!("Ignoring unreadable cache entry for {}: {}", id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATMEGA16: &str = include_str!("../../testdata/ATmega16.atdf");
    const ATMEGA32: &str = include_str!("../../testdata/ATmega32.atdf");
    const ATTINY13: &str = include_str!("../../testdata/ATtiny13.atdf");

    fn repo() -> DescriptorRepository {
        let mut repo = DescriptorRepository::new();
        repo.add_xml("atmega16", ATMEGA16, 20240101);
        repo.add_xml("atmega32", ATMEGA32, 20240101);
        repo.add_xml("attiny13", ATTINY13, 20240101);
        repo
    }

    #[test]
    fn test_lazy_lookup_is_cached() {
        let repo = repo();
        assert_eq!(repo.mcu_ids(), vec!["atmega16", "atmega32", "attiny13"]);

        let a = repo.get("atmega16").unwrap();
        let b = repo.get("ATmega16").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = repo.reload("atmega16").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(*a, *c);
    }

    #[test]
    fn test_unknown_mcu() {
        let repo = repo();
        assert!(!repo.contains("atmega328p"));
        assert!(matches!(
            repo.get("atmega328p"),
            Err(DescriptorError::UnknownMcu(_))
        ));
    }

    #[test]
    fn test_malformed_description_is_skipped() {
        let mut repo = repo();
        repo.add_xml("broken", "<avr-tools-device-file><devices>", 1);

        assert!(repo.contains("broken"));
        assert!(matches!(repo.get("broken"), Err(DescriptorError::UnknownMcu(_))));
        assert_eq!(repo.preload(), 3);
    }

    #[test]
    fn test_display_name() {
        let repo = repo();
        assert_eq!(repo.display_name("atmega16"), "ATmega16");
        assert_eq!(repo.display_name("attiny85"), "ATtiny85");
        assert_eq!(repo.display_name("atxmega128a1"), "ATxmega128A1");
        assert_eq!(repo.display_name("at90can128"), "AT90CAN128");
        assert_eq!(repo.display_name("foo"), "foo");
    }

    #[test]
    fn test_add_dir_with_cache() {
        let devices = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        fs::write(devices.path().join("ATmega16.atdf"), ATMEGA16).unwrap();
        fs::write(devices.path().join("ATtiny13.xml"), ATTINY13).unwrap();
        fs::write(devices.path().join("README.txt"), "not a device").unwrap();

        let mut repo = DescriptorRepository::new().with_cache_dir(cache.path());
        assert_eq!(repo.add_dir(devices.path()).unwrap(), 2);
        assert_eq!(repo.mcu_ids(), vec!["atmega16", "attiny13"]);

        let desc = repo.get("atmega16").unwrap();
        assert_eq!(desc.fuses.len(), 2);
        assert!(cache.path().join("atmega16.ron").is_file());

        // A second repository picks the descriptor up from the cache
        let mut second = DescriptorRepository::new().with_cache_dir(cache.path());
        second.add_dir(devices.path()).unwrap();
        assert_eq!(*second.get("atmega16").unwrap(), *desc);
    }

    #[test]
    fn test_cache_entry_tracks_fixups() {
        use crate::descriptor::FuseType;

        let devices = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        fs::write(devices.path().join("ATmega16.atdf"), ATMEGA16).unwrap();

        let mut first = DescriptorRepository::new().with_cache_dir(cache.path());
        first.add_dir(devices.path()).unwrap();
        let plain = first.get("atmega16").unwrap();
        assert!(plain.find_bitfield(FuseType::Fuse, "CKSEL").is_some());

        // Extra corrections must not be masked by the entry cached above
        let rename = Fixups::from_ron_str(
            r#"(bitfield_names: [(name: "CKSEL", caption_contains: "Clock", rename_to: "CKSELX")])"#,
        )
        .unwrap();
        let mut second = DescriptorRepository::new()
            .with_fixups(rename)
            .with_cache_dir(cache.path());
        second.add_dir(devices.path()).unwrap();
        let renamed = second.get("atmega16").unwrap();
        assert!(renamed.find_bitfield(FuseType::Fuse, "CKSELX").is_some());
        assert!(renamed.find_bitfield(FuseType::Fuse, "CKSEL").is_none());

        // The rebuilt entry now belongs to the extended tables
        let mut third = DescriptorRepository::new().with_cache_dir(cache.path());
        third.add_dir(devices.path()).unwrap();
        assert_eq!(*third.get("atmega16").unwrap(), *plain);
    }
}
