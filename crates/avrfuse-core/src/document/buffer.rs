//! Text buffer contract and an in-memory implementation

use std::collections::HashMap;

use thiserror::Error;

/// Half-open byte range `[start, end)` within a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextRange {
    /// First byte
    pub start: usize,
    /// One past the last byte
    pub end: usize,
}

impl TextRange {
    /// Create a range
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length in bytes
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if the range is empty
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Shift the range by `offset` bytes
    pub const fn offset(self, offset: usize) -> Self {
        Self::new(self.start + offset, self.end + offset)
    }
}

/// Handle of a sticky range created by [`TextBuffer::create_sticky`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StickyId(u64);

/// Error type for buffer edits
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The edit reaches past the end of the document
    #[error("edit {offset}+{length} is outside the document ({len} bytes)")]
    OutOfBounds {
        /// Edit offset
        offset: usize,
        /// Edit length
        length: usize,
        /// Document length
        len: usize,
    },

    /// The edit would split a UTF-8 character
    #[error("offset {0} is not on a character boundary")]
    NotCharBoundary(usize),
}

/// Mutable, line-oriented text buffer provided by the host editor
///
/// Offsets are byte offsets, lines are numbered from 0 and never include the
/// line terminator. Sticky ranges are kept valid by the buffer itself across
/// edits that do not touch them.
pub trait TextBuffer {
    /// Complete document text
    fn text(&self) -> &str;

    /// Document length in bytes
    fn len(&self) -> usize {
        self.text().len()
    }

    /// Check if the document is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of lines (a trailing newline starts one more, empty, line)
    fn line_count(&self) -> usize;

    /// Range of a line without its terminator
    fn line_range(&self, line: usize) -> Option<TextRange>;

    /// Text of a line without its terminator
    fn line_text(&self, line: usize) -> Option<&str> {
        let range = self.line_range(line)?;
        self.text().get(range.start..range.end)
    }

    /// Line containing a byte offset
    fn line_of_offset(&self, offset: usize) -> usize;

    /// Replace `length` bytes at `offset` with `text`
    fn replace(&mut self, offset: usize, length: usize, text: &str) -> Result<(), BufferError>;

    /// Create a range that follows later edits
    fn create_sticky(&mut self, range: TextRange) -> StickyId;

    /// Current position of a sticky range
    ///
    /// Returns `None` once an edit has partially overwritten the range or
    /// after it was released.
    fn sticky_range(&self, id: StickyId) -> Option<TextRange>;

    /// Stop tracking a sticky range
    fn release_sticky(&mut self, id: StickyId);
}

/// [`TextBuffer`] backed by a `String`
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    text: String,
    line_starts: Vec<usize>,
    stickies: HashMap<StickyId, Option<TextRange>>,
    next_sticky: u64,
}

impl MemoryBuffer {
    /// Create a buffer holding `text`
    pub fn new(text: impl Into<String>) -> Self {
        let mut buffer = Self {
            text: text.into(),
            ..Default::default()
        };
        buffer.index_lines();
        buffer
    }

    /// Number of live sticky ranges
    pub fn sticky_count(&self) -> usize {
        self.stickies.len()
    }

    /// Take the text out of the buffer
    pub fn into_text(self) -> String {
        self.text
    }

    fn index_lines(&mut self) {
        self.line_starts.clear();
        self.line_starts.push(0);
        self.line_starts
            .extend(self.text.match_indices('\n').map(|(idx, _)| idx + 1));
    }
}

/// New position of `range` after `[start, end)` was replaced by `inserted`
/// bytes
fn adjust(range: TextRange, start: usize, end: usize, inserted: usize) -> Option<TextRange> {
    if range.end <= start {
        Some(range)
    } else if range.start >= end {
        Some(TextRange::new(
            range.start - (end - start) + inserted,
            range.end - (end - start) + inserted,
        ))
    } else if range.start <= start && range.end >= end {
        Some(TextRange::new(range.start, range.end - (end - start) + inserted))
    } else {
        None
    }
}

impl TextBuffer for MemoryBuffer {
    fn text(&self) -> &str {
        &self.text
    }

    fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    fn line_range(&self, line: usize) -> Option<TextRange> {
        let start = *self.line_starts.get(line)?;
        let end = match self.line_starts.get(line + 1) {
            Some(next) => next - 1,
            None => self.text.len(),
        };
        // Tolerate CRLF documents
        let end = if end > start && self.text.as_bytes()[end - 1] == b'\r' {
            end - 1
        } else {
            end
        };
        Some(TextRange::new(start, end))
    }

    fn line_of_offset(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        }
    }

    fn replace(&mut self, offset: usize, length: usize, text: &str) -> Result<(), BufferError> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= self.text.len())
            .ok_or(BufferError::OutOfBounds {
                offset,
                length,
                len: self.text.len(),
            })?;
        for pos in [offset, end] {
            if !self.text.is_char_boundary(pos) {
                return Err(BufferError::NotCharBoundary(pos));
            }
        }

        self.text.replace_range(offset..end, text);
        self.index_lines();

        for range in self.stickies.values_mut() {
            *range = range.and_then(|r| adjust(r, offset, end, text.len()));
        }
        Ok(())
    }

    fn create_sticky(&mut self, range: TextRange) -> StickyId {
        let id = StickyId(self.next_sticky);
        self.next_sticky += 1;
        self.stickies.insert(id, Some(range));
        id
    }

    fn sticky_range(&self, id: StickyId) -> Option<TextRange> {
        self.stickies.get(&id).copied().flatten()
    }

    fn release_sticky(&mut self, id: StickyId) {
        self.stickies.remove(&id);
    }
}
