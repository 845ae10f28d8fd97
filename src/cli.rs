//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "avrfuse")]
#[command(author, version, about = "AVR fuse and lock-bit settings editor", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory with part descriptions (.atdf or .xml files)
    /// Defaults to ./devices/ and /usr/share/avrfuse/devices/
    #[arg(long, global = true)]
    pub devices: Option<PathBuf>,

    /// Directory for parsed part descriptions
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Don't cache parsed part descriptions
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List MCUs with a part description
    ListMcus {
        /// Only list MCUs whose id contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Show the fuse or lock-bit layout of an MCU
    Show {
        /// MCU id (e.g. atmega328p)
        mcu: String,

        /// Show lock bits instead of fuses
        #[arg(long)]
        lockbits: bool,
    },

    /// List programming interfaces and what they can do
    ListInterfaces,

    /// Create a settings document
    New {
        /// MCU id (e.g. atmega328p)
        mcu: String,

        /// Output file (.fuses or .locks)
        #[arg(short, long)]
        output: PathBuf,

        /// Create a lock-bit document
        #[arg(long)]
        lockbits: bool,

        /// Start from the factory defaults instead of unset bytes
        #[arg(long)]
        defaults: bool,

        /// Free-text comment
        #[arg(short, long)]
        summary: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check a settings document and print its diagnostics
    Check {
        /// Settings document
        file: PathBuf,
    },

    /// Set bitfields of a settings document
    Set {
        /// Settings document
        file: PathBuf,

        /// Assignments (NAME=VALUE, or summary=TEXT)
        #[arg(required = true)]
        assignments: Vec<String>,
    },

    /// Switch a settings document to another MCU
    Switch {
        /// Settings document
        file: PathBuf,

        /// New MCU id
        mcu: String,

        /// Don't carry values of identically named bitfields over
        #[arg(long)]
        no_carry: bool,
    },

    /// Print the avrdude command that programs a settings document
    Avrdude {
        /// Settings document
        file: PathBuf,

        /// Programming interface [isp, jtag, pdi, tpi, updi, debugwire, hvsp, hvpp]
        #[arg(short, long)]
        interface: Option<String>,

        /// MCU being programmed (defaults to the document's MCU)
        #[arg(short = 'p', long)]
        mcu: Option<String>,

        /// Verify every written byte
        #[arg(long)]
        verify: bool,

        /// Print only the -U arguments
        #[arg(long)]
        args_only: bool,
    },
}
