//! Line-oriented settings documents
//!
//! A settings document is a small `KEY=VALUE` text file naming an MCU and
//! the values of its bitfields. [`DocumentSync`] keeps such a document and a
//! [`ByteValues`](crate::values::ByteValues) model in step while either side
//! is edited, and maintains per-key diagnostics.
//!
//! The host editor supplies the text buffer and the diagnostic store through
//! the [`TextBuffer`] and [`DiagnosticStore`] traits. [`MemoryBuffer`] and
//! [`MemoryDiagnostics`] implement them in memory.

mod buffer;
mod diagnostics;
pub mod grammar;
mod sync;

pub use buffer::{BufferError, MemoryBuffer, StickyId, TextBuffer, TextRange};
pub use diagnostics::{
    Diagnostic, DiagnosticId, DiagnosticKind, DiagnosticStore, MemoryDiagnostics, Severity,
};
pub use grammar::{MCU_KEY, SUMMARY_KEY};
pub use sync::{DocumentSync, Property, SyncError, SyncState, SyncStats};
