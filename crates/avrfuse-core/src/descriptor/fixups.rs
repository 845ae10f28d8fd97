//! Correction tables for vendor part descriptions
//!
//! A few part description files reference enumeration groups under a name
//! that does not exist, or carry mistyped bitfield names. The corrections
//! are plain data (a RON table) so that new entries never touch the parser.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use once_cell::sync::Lazy;

use super::DescriptorError;

/// Built-in correction table, compiled into the crate
const BUILTIN_FIXUPS: &str = include_str!("fixups.ron");

static BUILTIN: Lazy<Fixups> = Lazy::new(|| match Fixups::from_ron_str(BUILTIN_FIXUPS) {
    Ok(fixups) => fixups,
    Err(e) => {
        log::error!("Built-in part description fix-ups are invalid: {}", e);
        Fixups::default()
    }
});

/// Rewrite of an enumeration reference to the group that actually exists
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize)]
pub struct ValueGroupFixup {
    /// Only apply to this MCU id
    #[serde(default)]
    pub mcu: Option<String>,
    /// Reference as written in the bitfield's `values` attribute
    pub reference: String,
    /// Name of the value group to use instead
    pub group: String,
}

/// Rename of a mistyped bitfield
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize)]
pub struct BitfieldNameFixup {
    /// Only apply to this MCU id
    #[serde(default)]
    pub mcu: Option<String>,
    /// Bitfield name as written in the part description
    pub name: String,
    /// Text the bitfield caption has to contain
    pub caption_contains: String,
    /// Corrected name
    pub rename_to: String,
}

/// Both correction tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(default)]
pub struct Fixups {
    /// Enumeration reference corrections
    pub value_groups: Vec<ValueGroupFixup>,
    /// Bitfield name corrections
    pub bitfield_names: Vec<BitfieldNameFixup>,
}

fn applies_to(entry_mcu: &Option<String>, mcu_id: &str) -> bool {
    entry_mcu
        .as_deref()
        .is_none_or(|mcu| mcu.eq_ignore_ascii_case(mcu_id))
}

impl Fixups {
    /// The correction table shipped with the crate
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Parse a correction table from a RON string
    pub fn from_ron_str(content: &str) -> Result<Self, DescriptorError> {
        Ok(ron::from_str(content)?)
    }

    /// Load a correction table from a RON file
    pub fn load_file(path: &Path) -> Result<Self, DescriptorError> {
        let content = fs::read_to_string(path)?;
        Self::from_ron_str(&content)
    }

    /// Append the entries of another table
    pub fn extend(&mut self, other: Fixups) {
        self.value_groups.extend(other.value_groups);
        self.bitfield_names.extend(other.bitfield_names);
    }

    /// Fingerprint of the table contents
    ///
    /// Cached descriptors record the fingerprint of the tables they were
    /// built with. The value is only stable within one build of the crate,
    /// so a rebuilt binary may reparse once.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Resolve an enumeration reference for `mcu_id`
    pub fn value_group<'a>(&'a self, mcu_id: &str, reference: &'a str) -> &'a str {
        self.value_groups
            .iter()
            .find(|f| f.reference == reference && applies_to(&f.mcu, mcu_id))
            .map_or(reference, |f| f.group.as_str())
    }

    /// Resolve a bitfield name for `mcu_id`
    pub fn bitfield_name<'a>(&'a self, mcu_id: &str, name: &'a str, caption: &str) -> &'a str {
        self.bitfield_names
            .iter()
            .find(|f| {
                f.name == name && caption.contains(&f.caption_contains) && applies_to(&f.mcu, mcu_id)
            })
            .map_or(name, |f| f.rename_to.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_parses() {
        let fixups = Fixups::from_ron_str(BUILTIN_FIXUPS).unwrap();
        assert!(!fixups.value_groups.is_empty());
        assert!(!fixups.bitfield_names.is_empty());
    }

    #[test]
    fn test_value_group_lookup() {
        let fixups = Fixups::builtin();
        assert_eq!(
            fixups.value_group("atmega16", "ENUM_BOOTSZ_RWW"),
            "ENUM_BOOTSZ"
        );
        // Restricted to the listed MCU
        assert_eq!(
            fixups.value_group("atmega32", "ENUM_BOOTSZ_RWW"),
            "ENUM_BOOTSZ_RWW"
        );
        assert_eq!(fixups.value_group("atmega16", "ENUM_CKSEL"), "ENUM_CKSEL");
    }

    #[test]
    fn test_fingerprint_follows_contents() {
        let builtin = Fixups::builtin();
        assert_eq!(builtin.fingerprint(), Fixups::builtin().fingerprint());
        assert_ne!(builtin.fingerprint(), Fixups::default().fingerprint());

        let mut extended = Fixups::builtin();
        extended.extend(
            Fixups::from_ron_str(
                r#"(bitfield_names: [(name: "CKSEL", caption_contains: "Clock", rename_to: "CKSELX")])"#,
            )
            .unwrap(),
        );
        assert_ne!(builtin.fingerprint(), extended.fingerprint());
    }

    #[test]
    fn test_bitfield_name_requires_caption_match() {
        let fixups = Fixups::from_ron_str(
            r#"(
                bitfield_names: [
                    (name: "BODLEVEL", caption_contains: "enable", rename_to: "BODEN"),
                ],
            )"#,
        )
        .unwrap();

        assert_eq!(
            fixups.bitfield_name("any", "BODLEVEL", "Brown-out enable"),
            "BODEN"
        );
        assert_eq!(
            fixups.bitfield_name("any", "BODLEVEL", "Brown-out trigger level"),
            "BODLEVEL"
        );
    }
}
