//! MCU fuse and lock-bit descriptors
//!
//! This module parses vendor part descriptions into [`McuDescriptor`]s and
//! keeps them in a [`DescriptorRepository`] for the lifetime of a session.

mod cache;
mod fixups;
mod parser;
mod repository;
mod types;

pub use cache::DescriptorCache;
pub use fixups::{BitfieldNameFixup, Fixups, ValueGroupFixup};
pub use parser::{parse_file, parse_str, version_stamp};
pub use repository::DescriptorRepository;
pub use types::*;

use thiserror::Error;

/// Error type for part description parsing and lookup
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// I/O error reading a part description or cache file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The XML reader rejected the document
    #[error("XML error at byte {position}: {source}")]
    Xml {
        /// Byte offset where the reader stopped
        position: u64,
        /// Underlying reader error
        source: quick_xml::Error,
    },

    /// Malformed attribute syntax
    #[error("XML error: {0}")]
    Malformed(#[from] quick_xml::Error),

    /// The document ended while an element was still open
    #[error("unexpected end of document inside <{0}>")]
    UnexpectedEof(String),

    /// A required attribute is missing
    #[error("<{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        /// Element name
        element: String,
        /// Attribute name
        attribute: String,
    },

    /// An attribute value could not be interpreted
    #[error("invalid value '{value}' for attribute '{attribute}' of <{element}>")]
    InvalidAttribute {
        /// Element name
        element: String,
        /// Attribute name
        attribute: String,
        /// Offending value
        value: String,
    },

    /// The document does not name a device
    #[error("no <device> element found")]
    NoDevice,

    /// The MCU is not known to the repository (or its description was skipped)
    #[error("unknown MCU '{0}'")]
    UnknownMcu(String),

    /// A file modification time could not be converted to a date
    #[error("invalid file timestamp: {0}")]
    Timestamp(String),

    /// A fix-up table or cache entry could not be parsed
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// A cache entry could not be written
    #[error("cache error: {0}")]
    Cache(#[from] ron::Error),
}
