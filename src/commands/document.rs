//! Document command implementations

use std::fs;
use std::path::Path;

use avrfuse_core::descriptor::{DescriptorRepository, FuseType};
use avrfuse_core::document::grammar::{parse_int_literal, unescape_summary};
use avrfuse_core::document::{
    DocumentSync, MemoryBuffer, MemoryDiagnostics, TextBuffer, MCU_KEY, SUMMARY_KEY,
};
use avrfuse_core::values::ByteValues;

/// A settings document opened from a file
pub type Document<'r> = DocumentSync<'r, MemoryBuffer, MemoryDiagnostics>;

/// Options of the `new` command
#[derive(Debug, Clone, Copy)]
pub struct NewOptions<'a> {
    /// Fuses or lock bits
    pub fuse_type: FuseType,
    /// Start from the factory defaults
    pub defaults: bool,
    /// Free-text comment
    pub summary: Option<&'a str>,
    /// Overwrite an existing file
    pub force: bool,
}

/// Document type of a file, by extension
pub fn fuse_type_for(path: &Path) -> FuseType {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("locks") || ext.eq_ignore_ascii_case("lockbits") => {
            FuseType::Lockbits
        }
        _ => FuseType::Fuse,
    }
}

/// Read a document and run it through the engine once
pub fn open_document<'r>(
    repo: &'r DescriptorRepository,
    path: &Path,
) -> Result<Document<'r>, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    log::debug!("Opened {} ({} bytes)", path.display(), text.len());
    Ok(DocumentSync::new(
        repo,
        fuse_type_for(path),
        MemoryBuffer::new(text),
        MemoryDiagnostics::new(),
    ))
}

fn save_document(doc: &Document<'_>, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::write(path, doc.buffer().text())?;
    log::debug!("Saved {}", path.display());
    Ok(())
}

/// Print the diagnostics of a document to stderr
pub fn print_diagnostics(doc: &Document<'_>, path: &Path) {
    for diagnostic in doc.diagnostics().sorted() {
        eprintln!("{}: {}", path.display(), diagnostic);
    }
}

fn require_model<'d>(
    doc: &'d Document<'_>,
    path: &Path,
) -> Result<&'d ByteValues, Box<dyn std::error::Error>> {
    doc.model().ok_or_else(|| {
        print_diagnostics(doc, path);
        format!("{} does not name an MCU", path.display()).into()
    })
}

/// Create a settings document for an MCU
pub fn cmd_new(
    repo: &DescriptorRepository,
    output: &Path,
    mcu_id: &str,
    options: NewOptions<'_>,
) -> Result<(), Box<dyn std::error::Error>> {
    if output.exists() && !options.force {
        return Err(format!("{} already exists (use --force to overwrite)", output.display()).into());
    }

    let mut model = ByteValues::new(options.fuse_type, repo.get(mcu_id)?);
    if options.defaults {
        model.set_defaults();
    }
    if let Some(summary) = options.summary {
        model.set_comment(unescape_summary(summary));
    }

    let mut doc = DocumentSync::new(
        repo,
        options.fuse_type,
        MemoryBuffer::new(""),
        MemoryDiagnostics::new(),
    );
    doc.attach_model(model)?;
    save_document(&doc, output)?;

    println!(
        "Created {} ({} of {})",
        output.display(),
        options.fuse_type,
        repo.display_name(mcu_id)
    );
    Ok(())
}

/// Check a settings document and print its values
pub fn cmd_check(repo: &DescriptorRepository, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let doc = open_document(repo, file)?;
    print_diagnostics(&doc, file);

    if let Some(model) = doc.model() {
        println!("MCU:     {} ({})", model.mcu_id(), model.descriptor().name);
        if !model.comment().is_empty() {
            println!("Summary: {}", model.comment());
        }
        for (index, value) in model.values().iter().enumerate() {
            let Some(byte) = model.byte_descriptor(index) else {
                continue;
            };
            match u8::try_from(*value) {
                Ok(value) => println!("  {:<10} 0x{:02X}", byte.name, value),
                Err(_) => println!("  {:<10} unset", byte.name),
            }
        }
    }

    if doc.diagnostics().has_errors() {
        return Err(format!("{} has errors", file.display()).into());
    }

    let warnings = doc.diagnostics().len();
    if warnings > 0 {
        println!("{}: {} warning(s)", file.display(), warnings);
    } else {
        println!("{}: OK", file.display());
    }
    Ok(())
}

/// Apply `NAME=VALUE` assignments to a settings document
pub fn cmd_set(
    repo: &DescriptorRepository,
    file: &Path,
    assignments: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut doc = open_document(repo, file)?;
    require_model(&doc, file)?;

    for assignment in assignments {
        let Some((name, value)) = assignment.split_once('=') else {
            return Err(format!("expected NAME=VALUE, got '{}'", assignment).into());
        };
        let name = name.trim();

        if name == SUMMARY_KEY {
            doc.set_comment(&unescape_summary(value.trim()))?;
        } else if name == MCU_KEY {
            return Err("use the switch command to change the MCU".into());
        } else {
            let value = parse_int_literal(value)
                .ok_or_else(|| format!("invalid value for {}: '{}'", name, value.trim()))?;
            doc.set_named_value(name, value)?;
        }
        log::debug!("Applied {}", assignment);
    }

    print_diagnostics(&doc, file);
    save_document(&doc, file)?;
    println!("Updated {}", file.display());
    Ok(())
}

/// Switch a settings document to another MCU
pub fn cmd_switch(
    repo: &DescriptorRepository,
    file: &Path,
    mcu_id: &str,
    carry_forward: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Fail before the document is touched
    repo.get(mcu_id)?;

    let mut doc = open_document(repo, file)?;
    let from = require_model(&doc, file)?.mcu_id().to_string();

    doc.set_mcu(mcu_id, carry_forward)?;
    save_document(&doc, file)?;

    println!(
        "Switched {} from {} to {}",
        file.display(),
        repo.display_name(&from),
        repo.display_name(mcu_id)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const ATMEGA16: &str = include_str!("../../crates/avrfuse-core/testdata/ATmega16.atdf");
    const ATMEGA32: &str = include_str!("../../crates/avrfuse-core/testdata/ATmega32.atdf");

    fn repo() -> DescriptorRepository {
        let mut repo = DescriptorRepository::new();
        repo.add_xml("atmega16", ATMEGA16, 1);
        repo.add_xml("atmega32", ATMEGA32, 1);
        repo
    }

    fn options(defaults: bool) -> NewOptions<'static> {
        NewOptions {
            fuse_type: FuseType::Fuse,
            defaults,
            summary: None,
            force: false,
        }
    }

    fn create(dir: &Path, name: &str, defaults: bool) -> (DescriptorRepository, PathBuf) {
        let repo = repo();
        let path = dir.join(name);
        cmd_new(&repo, &path, "atmega16", options(defaults)).unwrap();
        (repo, path)
    }

    #[test]
    fn test_fuse_type_for() {
        assert_eq!(fuse_type_for(Path::new("a.fuses")), FuseType::Fuse);
        assert_eq!(fuse_type_for(Path::new("a.locks")), FuseType::Lockbits);
        assert_eq!(fuse_type_for(Path::new("a.LOCKBITS")), FuseType::Lockbits);
        assert_eq!(fuse_type_for(Path::new("noext")), FuseType::Fuse);
    }

    #[test]
    fn test_new_document() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, path) = create(dir.path(), "board.fuses", false);

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# Fuse settings for ATmega16\nMCU=atmega16\n"
        );

        // Refuses to overwrite without force
        assert!(cmd_new(&repo, &path, "atmega16", options(false)).is_err());
        let forced = NewOptions {
            force: true,
            ..options(true)
        };
        cmd_new(&repo, &path, "atmega16", forced).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("CKSEL=0x01\n"));
    }

    #[test]
    fn test_new_unknown_mcu() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.fuses");
        assert!(cmd_new(&repo(), &path, "atmega999", options(false)).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_new_lockbit_document_with_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.locks");
        let repo = repo();
        let opts = NewOptions {
            fuse_type: FuseType::Lockbits,
            summary: Some("line one\\nline two"),
            ..options(true)
        };
        cmd_new(&repo, &path, "atmega16", opts).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# Lock bit settings for ATmega16\n\
             MCU=atmega16\n\
             summary=line one\\nline two\n\
             BLB1=0x03\n\
             BLB0=0x03\n\
             LB=0x03\n"
        );
        cmd_check(&repo, &path).unwrap();
    }

    #[test]
    fn test_set_values() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, path) = create(dir.path(), "board.fuses", true);

        cmd_set(
            &repo,
            &path,
            &["CKSEL=0x0F".to_string(), "summary=hello".to_string()],
        )
        .unwrap();

        let doc = open_document(&repo, &path).unwrap();
        let model = doc.model().unwrap();
        assert_eq!(model.get_named_value("CKSEL"), Ok(0x0F));
        assert_eq!(model.get_named_value("SUT"), Ok(2));
        assert_eq!(model.comment(), "hello");
        assert!(doc.diagnostics().is_empty());
    }

    #[test]
    fn test_set_rejects_bad_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, path) = create(dir.path(), "board.fuses", true);
        let before = fs::read_to_string(&path).unwrap();

        for bad in ["CKSEL", "CKSEL=abc", "CKSEL=0x10", "NOPE=1", "MCU=atmega32"] {
            assert!(cmd_set(&repo, &path, &[bad.to_string()]).is_err(), "{}", bad);
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_check_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo();

        let missing = dir.path().join("missing.fuses");
        fs::write(&missing, "CKSEL=0x01\n").unwrap();
        assert!(cmd_check(&repo, &missing).is_err());

        let warning = dir.path().join("warning.fuses");
        fs::write(&warning, "MCU=atmega16\nCKSEL=0x20\n").unwrap();
        cmd_check(&repo, &warning).unwrap();

        assert!(cmd_set(&repo, &missing, &["CKSEL=1".to_string()]).is_err());
    }

    #[test]
    fn test_switch_carries_values() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, path) = create(dir.path(), "board.fuses", true);

        assert!(cmd_switch(&repo, &path, "atmega999", true).is_err());
        cmd_switch(&repo, &path, "atmega32", true).unwrap();

        let doc = open_document(&repo, &path).unwrap();
        let model = doc.model().unwrap();
        assert_eq!(model.mcu_id(), "atmega32");
        assert_eq!(model.values(), &[0xE1, 0x99]);
    }
}
