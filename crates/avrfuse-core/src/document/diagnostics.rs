//! Diagnostics attached to a settings document

use core::fmt;
use std::collections::BTreeMap;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// The document cannot be used as is
    Error,
    /// The offending line is ignored
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// What a diagnostic complains about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// The `MCU` key is missing
    MissingRequiredKey,
    /// A key appears more than once
    DuplicateKey,
    /// A line that is neither a property, a comment nor blank
    GarbageLine,
    /// The `MCU` value names an MCU without part description
    UnknownMcu,
    /// A key that is not a bitfield of the current MCU
    UnknownBitfieldName,
    /// A value that is not a number or does not fit the bitfield
    InvalidValue,
}

impl DiagnosticKind {
    /// Default severity of this kind
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticKind::MissingRequiredKey | DiagnosticKind::UnknownMcu => Severity::Error,
            DiagnosticKind::DuplicateKey
            | DiagnosticKind::GarbageLine
            | DiagnosticKind::UnknownBitfieldName
            | DiagnosticKind::InvalidValue => Severity::Warning,
        }
    }

    /// Whether this kind is raised while applying values to the model, as
    /// opposed to while reading lines
    pub fn is_sync_issue(self) -> bool {
        matches!(
            self,
            DiagnosticKind::UnknownMcu
                | DiagnosticKind::UnknownBitfieldName
                | DiagnosticKind::InvalidValue
        )
    }
}

/// One diagnostic record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    /// Property the diagnostic belongs to (`garbage@<line>` for garbage lines)
    pub owner_key: String,
    /// Kind
    pub kind: DiagnosticKind,
    /// Severity
    pub severity: Severity,
    /// Line number, starting at 0
    pub line: usize,
    /// First byte of the marked text, counted from the line start
    pub char_start: usize,
    /// One past the last byte of the marked text, counted from the line start
    pub char_end: usize,
    /// Human readable message
    pub message: String,
}

impl Diagnostic {
    /// Create a diagnostic with the default severity of its kind
    pub fn new(
        owner_key: impl Into<String>,
        kind: DiagnosticKind,
        line: usize,
        char_start: usize,
        char_end: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            owner_key: owner_key.into(),
            kind,
            severity: kind.severity(),
            line,
            char_start,
            char_end,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: line {}: {}", self.severity, self.line + 1, self.message)
    }
}

/// Handle of a stored diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiagnosticId(u64);

/// Per-document diagnostic store provided by the host editor
pub trait DiagnosticStore {
    /// Attach a diagnostic to the document
    fn create(&mut self, diagnostic: Diagnostic) -> DiagnosticId;

    /// All diagnostics owned by a key
    fn find_all_by_owner_key(&self, owner_key: &str) -> Vec<DiagnosticId>;

    /// All diagnostics of the document
    fn ids(&self) -> Vec<DiagnosticId>;

    /// Look up a diagnostic
    fn get(&self, id: DiagnosticId) -> Option<&Diagnostic>;

    /// Remove a diagnostic; returns false if it did not exist
    fn delete(&mut self, id: DiagnosticId) -> bool;
}

/// [`DiagnosticStore`] kept in memory
///
/// Counts creations and deletions so callers can tell whether an update
/// actually touched the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryDiagnostics {
    entries: BTreeMap<DiagnosticId, Diagnostic>,
    next_id: u64,
    created: usize,
    deleted: usize,
}

impl MemoryDiagnostics {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored diagnostics in creation order
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.values()
    }

    /// Stored diagnostics sorted by line
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut list: Vec<_> = self.entries.values().collect();
        list.sort_by_key(|d| (d.line, d.char_start));
        list
    }

    /// Number of stored diagnostics
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no diagnostic is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of diagnostics created so far
    pub fn created(&self) -> usize {
        self.created
    }

    /// Number of diagnostics deleted so far
    pub fn deleted(&self) -> usize {
        self.deleted
    }

    /// Check if any stored diagnostic is an error
    pub fn has_errors(&self) -> bool {
        self.entries.values().any(|d| d.severity == Severity::Error)
    }
}

impl DiagnosticStore for MemoryDiagnostics {
    fn create(&mut self, diagnostic: Diagnostic) -> DiagnosticId {
        let id = DiagnosticId(self.next_id);
        self.next_id += 1;
        self.created += 1;
        self.entries.insert(id, diagnostic);
        id
    }

    fn find_all_by_owner_key(&self, owner_key: &str) -> Vec<DiagnosticId> {
        self.entries
            .iter()
            .filter(|(_, d)| d.owner_key == owner_key)
            .map(|(id, _)| *id)
            .collect()
    }

    fn ids(&self) -> Vec<DiagnosticId> {
        self.entries.keys().copied().collect()
    }

    fn get(&self, id: DiagnosticId) -> Option<&Diagnostic> {
        self.entries.get(&id)
    }

    fn delete(&mut self, id: DiagnosticId) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            self.deleted += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_by_owner() {
        let mut store = MemoryDiagnostics::new();
        let a = store.create(Diagnostic::new("CKSEL", DiagnosticKind::InvalidValue, 1, 10, 12, "bad"));
        store.create(Diagnostic::new("MCU", DiagnosticKind::UnknownMcu, 0, 4, 8, "unknown"));
        let c = store.create(Diagnostic::new("CKSEL", DiagnosticKind::DuplicateKey, 1, 4, 9, "dup"));

        assert_eq!(store.find_all_by_owner_key("CKSEL"), vec![a, c]);
        assert!(store.has_errors());
        assert!(store.delete(a));
        assert!(!store.delete(a));
        assert_eq!(store.len(), 2);
        assert_eq!((store.created(), store.deleted()), (3, 1));
        assert_eq!(store.sorted()[0].owner_key, "MCU");
    }

    #[test]
    fn test_severity() {
        assert_eq!(DiagnosticKind::MissingRequiredKey.severity(), Severity::Error);
        assert_eq!(DiagnosticKind::UnknownMcu.severity(), Severity::Error);
        assert_eq!(DiagnosticKind::InvalidValue.severity(), Severity::Warning);
        assert!(!DiagnosticKind::DuplicateKey.is_sync_issue());
        assert!(DiagnosticKind::UnknownBitfieldName.is_sync_issue());
    }
}
