//! Error types for avrfuse-core
//!
//! Each component has its own error enum; this module ties them together
//! for callers that just want to propagate with `?`.

use thiserror::Error;

use crate::action::ActionError;
use crate::descriptor::DescriptorError;
use crate::document::{BufferError, SyncError};
use crate::values::ValueError;

/// Crate-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Part description or repository failure
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    /// Byte value access failure
    #[error(transparent)]
    Value(#[from] ValueError),
    /// Text buffer failure
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// Document sync failure
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// Programmer action encoding failure
    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Result type alias using the crate-level Error type
pub type Result<T> = core::result::Result<T, Error>;
