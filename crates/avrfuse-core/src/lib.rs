//! avrfuse-core - Core library for AVR fuse and lock-bit settings
//!
//! This crate models the fuse and lock-bit bytes of AVR microcontrollers and
//! keeps a line-oriented `KEY=VALUE` document in sync with them.
//!
//! # Components
//!
//! - [`descriptor`] - Part description parsing and the per-MCU descriptor
//!   repository (byte and bitfield layout of each MCU)
//! - [`values`] - The runtime byte values of one MCU, with named bitfield
//!   accessors and change notification
//! - [`document`] - Bidirectional sync between a text document and a set of
//!   byte values, including per-key diagnostics
//! - [`action`] - Conversion of finished byte values into programmer
//!   write actions
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//!
//! use avrfuse_core::descriptor::{DescriptorRepository, FuseType};
//! use avrfuse_core::values::ByteValues;
//!
//! let mut repo = DescriptorRepository::new();
//! repo.add_dir(Path::new("devices"))?;
//! let descriptor = repo.get("atmega16")?;
//! let mut values = ByteValues::new(FuseType::Fuse, descriptor);
//! values.set_named_value("CKSEL", 0x0F)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod action;
pub mod descriptor;
pub mod document;
pub mod error;
pub mod values;

pub use error::{Error, Result};
