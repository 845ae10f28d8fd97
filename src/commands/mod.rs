//! CLI command implementations
//!
//! ## Catalog commands
//!
//! `catalog` prints what the part descriptions and the interface table know,
//! without touching any document.
//!
//! ## Document commands
//!
//! `document` opens settings documents into the document engine and saves
//! them back, so edits made here behave like edits in an interactive editor.
//! `avrdude` turns a finished document into an avrdude command line.

mod avrdude;
mod catalog;
mod document;

pub use avrdude::{cmd_avrdude, AvrdudeOptions};
pub use catalog::{list_interfaces, list_mcus, show_mcu};
pub use document::{cmd_check, cmd_new, cmd_set, cmd_switch, fuse_type_for, NewOptions};
