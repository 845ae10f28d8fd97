//! avrdude command line generation

use std::path::Path;

use avrfuse_core::action::{self, ProgrammerInterface};
use avrfuse_core::descriptor::DescriptorRepository;

use super::document::{open_document, print_diagnostics};
use crate::config::ProgrammerConfig;

/// Programmer id used when neither the configuration nor the command line
/// names one
const DEFAULT_PROGRAMMER: &str = "usbasp";

/// Options of the `avrdude` command
#[derive(Debug, Clone, Copy, Default)]
pub struct AvrdudeOptions<'a> {
    /// Programming interface, overrides the configuration
    pub interface: Option<&'a str>,
    /// MCU being programmed, defaults to the document's MCU
    pub mcu: Option<&'a str>,
    /// Verify every written byte
    pub verify: bool,
    /// Print only the `-U` arguments
    pub args_only: bool,
}

/// Build the avrdude arguments for a document
pub fn build_args(
    repo: &DescriptorRepository,
    file: &Path,
    programmer: &ProgrammerConfig,
    options: AvrdudeOptions<'_>,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let doc = open_document(repo, file)?;
    if doc.diagnostics().has_errors() {
        print_diagnostics(&doc, file);
        return Err(format!("{} has errors", file.display()).into());
    }
    let Some(model) = doc.model() else {
        return Err(format!("{} does not name an MCU", file.display()).into());
    };

    let interface: ProgrammerInterface = options
        .interface
        .or(programmer.interface.as_deref())
        .unwrap_or("isp")
        .parse()?;
    let mcu = options.mcu.unwrap_or(model.mcu_id());

    let actions = action::encode(model, mcu, interface, options.verify)?;
    if actions.is_empty() {
        log::warn!("{} has no set bytes, nothing to program", file.display());
    }
    let updates = action::to_args(&actions);

    if options.args_only {
        return Ok(updates);
    }

    let mut args = vec![
        "avrdude".to_string(),
        "-c".to_string(),
        programmer
            .id
            .clone()
            .unwrap_or_else(|| DEFAULT_PROGRAMMER.to_string()),
        "-p".to_string(),
        mcu.to_string(),
    ];
    if let Some(port) = &programmer.port {
        args.extend(["-P".to_string(), port.clone()]);
    }
    if let Some(baudrate) = programmer.baudrate {
        args.extend(["-b".to_string(), baudrate.to_string()]);
    }
    if let Some(bitclock) = &programmer.bitclock {
        args.extend(["-B".to_string(), bitclock.clone()]);
    }
    args.extend(programmer.extra_args.iter().cloned());
    args.extend(updates);

    Ok(args)
}

/// Print the avrdude command that programs a document
pub fn cmd_avrdude(
    repo: &DescriptorRepository,
    file: &Path,
    programmer: &ProgrammerConfig,
    options: AvrdudeOptions<'_>,
) -> Result<(), Box<dyn std::error::Error>> {
    let args = build_args(repo, file, programmer, options)?;
    println!("{}", args.join(" "));
    Ok(())
}
