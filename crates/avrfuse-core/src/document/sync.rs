//! Bidirectional synchronisation between a settings document and a model
//!
//! Every text edit reparses the whole document, rebuilds the per-key
//! bookkeeping and applies the values to the model ("forward sync"). Model
//! mutations are written back into the document ("reverse sync"): a single
//! bitfield or the comment only replaces its value text, an MCU switch or a
//! bulk update rewrites the document.
//!
//! Both directions run synchronously. [`SyncState`] records which direction
//! is in progress, so the notifications a direction causes for itself are
//! dropped instead of triggering the opposite direction.

use core::mem;
use core::ops::Range;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use thiserror::Error;

use super::buffer::{BufferError, StickyId, TextBuffer, TextRange};
use super::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticStore};
use super::grammar::{self, Line, MCU_KEY, SUMMARY_KEY};
use crate::descriptor::{DescriptorError, DescriptorRepository, FuseType};
use crate::values::{ByteValues, ListenerId, ValueChange, ValueError};

/// Error type for document operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The document does not name an MCU yet
    #[error("the document has no MCU, so there is no model yet")]
    NoModel,

    /// A model access failed
    #[error(transparent)]
    Value(#[from] ValueError),

    /// An MCU lookup failed
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// The text buffer rejected an edit
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Which direction is currently being applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Nothing in progress
    #[default]
    Idle,
    /// The engine is writing model changes into the document
    ApplyingToDocument,
    /// The engine is applying document values to the model
    ApplyingToModel,
}

/// Engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStats {
    /// Full reparses
    pub reparses: usize,
    /// Forward syncs (text to model)
    pub forward_syncs: usize,
    /// Reverse syncs (model to text)
    pub reverse_syncs: usize,
    /// Text notifications dropped because the engine caused them
    pub suppressed_text: usize,
    /// Model notifications dropped because the engine caused them
    pub suppressed_model: usize,
    /// Deepest nesting of text notifications seen
    pub max_depth: usize,
}

/// Resolved bookkeeping of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Key
    pub key: String,
    /// Raw value text, trimmed
    pub value: String,
    /// Line of the (last) occurrence
    pub line: usize,
    /// Current key position
    pub key_range: Option<TextRange>,
    /// Current value position
    pub value_range: Option<TextRange>,
}

#[derive(Debug)]
struct Entry {
    value: String,
    line: usize,
    key_span: StickyId,
    value_span: StickyId,
}

struct ParsedLine {
    key: String,
    value: String,
    line: usize,
    key_columns: Range<usize>,
    key_range: TextRange,
    value_range: TextRange,
}

fn absolute(range: Range<usize>, base: usize) -> TextRange {
    TextRange::new(range.start + base, range.end + base)
}

/// Columns of a document range within its line
fn columns<B: TextBuffer>(buffer: &B, line: usize, range: Option<TextRange>) -> (usize, usize) {
    let base = buffer.line_range(line).map_or(0, |r| r.start);
    let range = range.unwrap_or_default();
    (
        range.start.saturating_sub(base),
        range.end.saturating_sub(base),
    )
}

fn watch(model: &mut ByteValues, pending: &Rc<RefCell<Vec<ValueChange>>>) -> ListenerId {
    let sink = Rc::clone(pending);
    model.add_listener(move |change, _| sink.borrow_mut().push(change.clone()))
}

/// Keeps a settings document and a [`ByteValues`] model in step
#[derive(Debug)]
pub struct DocumentSync<'r, B, D> {
    repo: &'r DescriptorRepository,
    fuse_type: FuseType,
    buffer: B,
    diagnostics: D,
    model: Option<ByteValues>,
    listener: Option<ListenerId>,
    entries: BTreeMap<String, Entry>,
    state: SyncState,
    pending: Rc<RefCell<Vec<ValueChange>>>,
    stats: SyncStats,
    depth: usize,
}

impl<'r, B: TextBuffer, D: DiagnosticStore> DocumentSync<'r, B, D> {
    /// Open a document and read it once
    pub fn new(repo: &'r DescriptorRepository, fuse_type: FuseType, buffer: B, diagnostics: D) -> Self {
        let mut sync = Self {
            repo,
            fuse_type,
            buffer,
            diagnostics,
            model: None,
            listener: None,
            entries: BTreeMap::new(),
            state: SyncState::Idle,
            pending: Rc::new(RefCell::new(Vec::new())),
            stats: SyncStats::default(),
            depth: 0,
        };
        sync.handle_text_changed();
        sync
    }

    /// Whether the document holds fuses or lock bits
    pub fn fuse_type(&self) -> FuseType {
        self.fuse_type
    }

    /// The model, once the document named an MCU
    pub fn model(&self) -> Option<&ByteValues> {
        self.model.as_ref()
    }

    /// The text buffer
    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// The diagnostic store
    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    /// Current direction
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Engine counters
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Bookkeeping of every key, sorted by key
    pub fn properties(&self) -> Vec<Property> {
        self.entries
            .iter()
            .map(|(key, entry)| Property {
                key: key.clone(),
                value: entry.value.clone(),
                line: entry.line,
                key_range: self.buffer.sticky_range(entry.key_span),
                value_range: self.buffer.sticky_range(entry.value_span),
            })
            .collect()
    }

    /// Give up the document, returning its parts
    pub fn into_parts(mut self) -> (B, D, Option<ByteValues>) {
        if let (Some(model), Some(id)) = (self.model.as_mut(), self.listener.take()) {
            model.remove_listener(id);
        }
        (self.buffer, self.diagnostics, self.model)
    }

    /// Edit the text and notify the engine, as the host editor would
    pub fn edit_text(&mut self, offset: usize, length: usize, text: &str) -> Result<(), SyncError> {
        self.buffer.replace(offset, length, text)?;
        self.handle_text_changed();
        Ok(())
    }

    /// Text-changed callback of the host buffer
    pub fn handle_text_changed(&mut self) {
        self.depth += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.depth);

        if self.state == SyncState::Idle {
            self.refresh();
        } else {
            log::trace!("Ignoring text change while {:?}", self.state);
            self.stats.suppressed_text += 1;
        }

        self.depth -= 1;
    }

    /// Mutate the model and write the result back into the document
    pub fn edit_model<T, F>(&mut self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&mut ByteValues) -> T,
    {
        let model = self.model.as_mut().ok_or(SyncError::NoModel)?;
        let out = f(model);
        let changes = mem::take(&mut *self.pending.borrow_mut());
        self.reverse_sync(changes)?;
        Ok(out)
    }

    /// Set a bitfield through the model
    pub fn set_named_value(&mut self, name: &str, value: i64) -> Result<(), SyncError> {
        self.edit_model(|model| model.set_named_value(name, value))??;
        Ok(())
    }

    /// Set the comment through the model
    pub fn set_comment(&mut self, comment: &str) -> Result<(), SyncError> {
        self.edit_model(|model| model.set_comment(comment))
    }

    /// Switch the model to another MCU; the document is rewritten
    ///
    /// An unknown MCU still switches (to an empty layout) before the lookup
    /// error is returned.
    pub fn set_mcu(&mut self, mcu_id: &str, carry_forward: bool) -> Result<(), SyncError> {
        let repo = self.repo;
        self.edit_model(|model| model.set_mcu_id(mcu_id, carry_forward, repo))??;
        Ok(())
    }

    /// Replace the model and rewrite the document from it
    pub fn attach_model(&mut self, mut model: ByteValues) -> Result<(), SyncError> {
        if let (Some(old), Some(id)) = (self.model.as_mut(), self.listener.take()) {
            old.remove_listener(id);
        }
        self.pending.borrow_mut().clear();
        self.listener = Some(watch(&mut model, &self.pending));
        self.model = Some(model);
        self.reverse_sync(vec![ValueChange::ValuesReplaced])
    }

    fn refresh(&mut self) {
        let mut desired = self.reparse();
        self.forward_sync(&mut desired);
        self.reconcile(desired);
    }

    /// Rebuild the bookkeeping from scratch; returns the line-level
    /// diagnostics
    fn reparse(&mut self) -> Vec<Diagnostic> {
        self.stats.reparses += 1;
        for (_, entry) in mem::take(&mut self.entries) {
            self.buffer.release_sticky(entry.key_span);
            self.buffer.release_sticky(entry.value_span);
        }

        let mut desired = Vec::new();
        let mut parsed = Vec::new();
        for line in 0..self.buffer.line_count() {
            let (Some(range), Some(text)) = (self.buffer.line_range(line), self.buffer.line_text(line))
            else {
                continue;
            };
            match grammar::classify(text) {
                Line::Blank | Line::Comment => {}
                Line::Property {
                    key,
                    key_range,
                    value,
                    value_range,
                } => parsed.push(ParsedLine {
                    key: key.to_string(),
                    value: value.to_string(),
                    line,
                    key_columns: key_range.clone(),
                    key_range: absolute(key_range, range.start),
                    value_range: absolute(value_range, range.start),
                }),
                Line::Garbage => desired.push(Diagnostic::new(
                    format!("garbage@{}", line),
                    DiagnosticKind::GarbageLine,
                    line,
                    0,
                    range.len(),
                    format!("Unrecognised line '{}'", text.trim()),
                )),
            }
        }

        let mut first_seen: HashMap<String, (usize, Range<usize>)> = HashMap::new();
        let mut flagged = HashSet::new();
        for p in parsed {
            if let Some(old) = self.entries.remove(&p.key) {
                self.buffer.release_sticky(old.key_span);
                self.buffer.release_sticky(old.value_span);
                if let Some((line, cols)) = first_seen.get(&p.key) {
                    if flagged.insert(p.key.clone()) {
                        desired.push(Diagnostic::new(
                            p.key.clone(),
                            DiagnosticKind::DuplicateKey,
                            *line,
                            cols.start,
                            cols.end,
                            format!("Duplicate key '{}'; the last occurrence wins", p.key),
                        ));
                    }
                }
            } else {
                first_seen.insert(p.key.clone(), (p.line, p.key_columns.clone()));
            }

            let key_span = self.buffer.create_sticky(p.key_range);
            let value_span = self.buffer.create_sticky(p.value_range);
            self.entries.insert(
                p.key,
                Entry {
                    value: p.value,
                    line: p.line,
                    key_span,
                    value_span,
                },
            );
        }

        if !self.entries.contains_key(MCU_KEY) {
            desired.push(Diagnostic::new(
                MCU_KEY,
                DiagnosticKind::MissingRequiredKey,
                0,
                0,
                0,
                format!("Missing required key '{}'", MCU_KEY),
            ));
        }

        desired
    }

    /// Apply the document's values to the model
    fn forward_sync(&mut self, desired: &mut Vec<Diagnostic>) {
        self.stats.forward_syncs += 1;
        self.state = SyncState::ApplyingToModel;

        let base = desired.len();
        // A switched MCU changes which keys are legal, so start over once
        for _ in 0..2 {
            desired.truncate(base);
            if !self.apply_properties(desired) {
                break;
            }
        }

        let suppressed = mem::take(&mut *self.pending.borrow_mut()).len();
        if suppressed > 0 {
            log::trace!("Ignoring {} model change(s) caused by the document", suppressed);
            self.stats.suppressed_model += suppressed;
        }
        self.state = SyncState::Idle;
    }

    /// Returns true if the MCU changed and the pass has to be repeated
    ///
    /// Without an `MCU` line the model is left as it is until the line
    /// comes back.
    fn apply_properties(&mut self, desired: &mut Vec<Diagnostic>) -> bool {
        if !self.entries.contains_key(MCU_KEY) {
            return false;
        }
        let mut properties = self.properties();
        properties.sort_by_key(|p| p.line);

        for p in &properties {
            match p.key.as_str() {
                MCU_KEY => {
                    if self.apply_mcu(p, desired) {
                        return true;
                    }
                }
                SUMMARY_KEY => {
                    if let Some(model) = self.model.as_mut() {
                        let comment = grammar::unescape_summary(&p.value);
                        if model.comment() != comment {
                            model.set_comment(comment);
                        }
                    }
                }
                _ => self.apply_bitfield(p, desired),
            }
        }
        false
    }

    fn apply_mcu(&mut self, p: &Property, desired: &mut Vec<Diagnostic>) -> bool {
        let id = p.value.to_ascii_lowercase();
        if self.repo.get(&id).is_err() {
            let (start, end) = columns(&self.buffer, p.line, p.value_range);
            desired.push(Diagnostic::new(
                MCU_KEY,
                DiagnosticKind::UnknownMcu,
                p.line,
                start,
                end,
                format!("Unknown MCU '{}'", p.value),
            ));
        }

        match self.model.as_mut() {
            None => {
                let mut model = ByteValues::for_mcu(self.fuse_type, &id, self.repo);
                self.listener = Some(watch(&mut model, &self.pending));
                self.model = Some(model);
                log::debug!("Created {} model for {}", self.fuse_type, id);
                true
            }
            Some(model) if model.mcu_id() != id => {
                // The lookup error is already reported as a diagnostic
                let _ = model.set_mcu_id(&id, true, self.repo);
                true
            }
            Some(_) => false,
        }
    }

    fn apply_bitfield(&mut self, p: &Property, desired: &mut Vec<Diagnostic>) {
        let key_columns = columns(&self.buffer, p.line, p.key_range);
        let value_columns = columns(&self.buffer, p.line, p.value_range);
        let Some(model) = self.model.as_mut() else {
            return;
        };

        if model.bitfield(&p.key).is_none() {
            desired.push(Diagnostic::new(
                p.key.clone(),
                DiagnosticKind::UnknownBitfieldName,
                p.line,
                key_columns.0,
                key_columns.1,
                format!("'{}' is not a bitfield of {}", p.key, model.descriptor().name),
            ));
            return;
        }

        let invalid = |message: String| {
            Diagnostic::new(
                p.key.clone(),
                DiagnosticKind::InvalidValue,
                p.line,
                value_columns.0,
                value_columns.1,
                message,
            )
        };

        let Some(value) = grammar::parse_int_literal(&p.value) else {
            desired.push(invalid(if p.value.is_empty() {
                format!("Missing value for {}", p.key)
            } else {
                format!("'{}' is not a number", p.value)
            }));
            return;
        };

        if model.get_named_value(&p.key).map(i64::from) == Ok(value) {
            return;
        }
        if let Err(e) = model.set_named_value(&p.key, value) {
            desired.push(invalid(e.to_string()));
        }
    }

    /// Bring the diagnostic store in line with `desired`, leaving identical
    /// diagnostics alone
    fn reconcile(&mut self, mut desired: Vec<Diagnostic>) {
        for id in self.diagnostics.ids() {
            let keep = match self.diagnostics.get(id) {
                Some(existing) => match desired.iter().position(|d| d == existing) {
                    Some(pos) => {
                        desired.swap_remove(pos);
                        true
                    }
                    None => false,
                },
                None => continue,
            };
            if !keep {
                self.diagnostics.delete(id);
            }
        }

        for diagnostic in desired {
            log::debug!("{}", diagnostic);
            self.diagnostics.create(diagnostic);
        }
    }

    /// Write model changes into the document
    fn reverse_sync(&mut self, changes: Vec<ValueChange>) -> Result<(), SyncError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.stats.reverse_syncs += 1;

        self.state = SyncState::ApplyingToDocument;
        let result = self.apply_changes(&changes);
        self.state = SyncState::Idle;

        if result? {
            self.refresh();
        }
        Ok(())
    }

    /// Returns true if the whole document was rewritten
    fn apply_changes(&mut self, changes: &[ValueChange]) -> Result<bool, SyncError> {
        let full = changes
            .iter()
            .any(|c| matches!(c, ValueChange::McuChanged | ValueChange::ValuesReplaced));

        if !full {
            let mut in_place = true;
            for change in changes {
                if !self.apply_change(change)? {
                    in_place = false;
                    break;
                }
            }
            if in_place {
                return Ok(false);
            }
        }

        self.rewrite_document()?;
        Ok(true)
    }

    /// Returns false if the change could not be written in place
    fn apply_change(&mut self, change: &ValueChange) -> Result<bool, SyncError> {
        let model = self.model.as_ref().ok_or(SyncError::NoModel)?;
        let (key, value) = match change {
            ValueChange::Bitfield {
                name,
                bitfield_value,
                ..
            } => (name.clone(), grammar::format_value(*bitfield_value)),
            ValueChange::CommentChanged => {
                let value = grammar::escape_summary(model.comment());
                if value.is_empty() && !self.entries.contains_key(SUMMARY_KEY) {
                    return Ok(true);
                }
                (SUMMARY_KEY.to_string(), value)
            }
            ValueChange::McuChanged | ValueChange::ValuesReplaced => return Ok(false),
        };

        let span = self
            .entries
            .get(&key)
            .map(|entry| self.buffer.sticky_range(entry.value_span));
        match span {
            Some(Some(range)) => {
                if self.buffer.text().get(range.start..range.end) != Some(value.as_str()) {
                    self.write(range.start, range.len(), &value)?;
                }
                self.rebuild_entry(&key, range.start);
                self.clear_sync_diagnostics(&key);
                Ok(true)
            }
            Some(None) => {
                log::debug!("Lost the position of {}, rewriting the document", key);
                Ok(false)
            }
            None => {
                let len = self.buffer.len();
                let prefix = if len > 0 && !self.buffer.text().ends_with('\n') {
                    "\n"
                } else {
                    ""
                };
                self.write(len, 0, &format!("{}{}={}\n", prefix, key, value))?;
                self.rebuild_entry(&key, len + prefix.len());
                Ok(true)
            }
        }
    }

    fn rewrite_document(&mut self) -> Result<(), SyncError> {
        let model = self.model.as_ref().ok_or(SyncError::NoModel)?;
        let text = grammar::render(model);
        let len = self.buffer.len();
        self.write(0, len, &text)
    }

    /// Edit the buffer and deliver the host's change notification
    fn write(&mut self, offset: usize, length: usize, text: &str) -> Result<(), SyncError> {
        self.buffer.replace(offset, length, text)?;
        self.handle_text_changed();
        Ok(())
    }

    /// Re-read the bookkeeping of one key from the line containing `offset`
    fn rebuild_entry(&mut self, key: &str, offset: usize) {
        if let Some(old) = self.entries.remove(key) {
            self.buffer.release_sticky(old.key_span);
            self.buffer.release_sticky(old.value_span);
        }

        let line = self.buffer.line_of_offset(offset);
        let (Some(range), Some(text)) = (self.buffer.line_range(line), self.buffer.line_text(line))
        else {
            return;
        };
        let parsed = match grammar::classify(text) {
            Line::Property {
                key: found,
                key_range,
                value,
                value_range,
            } if found == key => Some((
                value.to_string(),
                absolute(key_range, range.start),
                absolute(value_range, range.start),
            )),
            _ => None,
        };

        match parsed {
            Some((value, key_range, value_range)) => {
                let key_span = self.buffer.create_sticky(key_range);
                let value_span = self.buffer.create_sticky(value_range);
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        line,
                        key_span,
                        value_span,
                    },
                );
            }
            None => log::warn!("Lost track of {} after rewriting line {}", key, line + 1),
        }
    }

    fn clear_sync_diagnostics(&mut self, key: &str) {
        for id in self.diagnostics.find_all_by_owner_key(key) {
            if self
                .diagnostics
                .get(id)
                .is_some_and(|d| d.kind.is_sync_issue())
            {
                self.diagnostics.delete(id);
            }
        }
    }
}
