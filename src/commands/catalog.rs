//! Catalog commands implementation

use avrfuse_core::action::INTERFACES;
use avrfuse_core::descriptor::{DescriptorRepository, FuseType};

/// List all MCUs with a part description
pub fn list_mcus(repo: &DescriptorRepository, filter: Option<&str>) {
    println!("Known MCUs:");
    println!();
    println!("{:<20} {:<20}", "Id", "Name");
    println!("{}", "-".repeat(40));

    let filter = filter.map(str::to_ascii_lowercase);
    let mut shown = 0;
    for id in repo.mcu_ids() {
        // Apply filter if specified
        if let Some(filter) = &filter {
            if !id.contains(filter.as_str()) {
                continue;
            }
        }

        println!("{:<20} {:<20}", id, repo.display_name(id));
        shown += 1;
    }

    if shown == 0 {
        println!("(none)");
    }
}

/// Show the byte and bitfield layout of one MCU
pub fn show_mcu(
    repo: &DescriptorRepository,
    mcu_id: &str,
    fuse_type: FuseType,
) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = repo.get(mcu_id)?;
    let bytes = descriptor.bytes(fuse_type);

    println!("{} ({}) - {}", descriptor.name, descriptor.mcu_id, fuse_type);
    println!("Version: {}", descriptor.version);
    println!();

    if bytes.is_empty() {
        println!("No {} bytes", fuse_type);
        return Ok(());
    }

    for byte in bytes {
        let default = byte
            .default_value
            .map(|v| format!("0x{:02X}", v))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} @ {} (default {}) - {}",
            byte.name, byte.offset, default, byte.caption
        );

        for bf in &byte.bitfields {
            println!(
                "  {:<12} mask 0x{:02X}  max {:>3}  {}",
                bf.name,
                bf.mask,
                bf.max_value(),
                bf.caption
            );
            for value in bf.values.iter().flatten() {
                println!("      0x{:02X}  {}", value.value, value.caption);
            }
        }
    }

    Ok(())
}

/// List the programming interfaces and their capabilities
pub fn list_interfaces() {
    println!("Programming interfaces:");
    println!();

    for info in INTERFACES.iter() {
        let aliases = if info.aliases.is_empty() {
            String::new()
        } else {
            format!(" ({})", info.aliases.join(", "))
        };
        println!("  {:<10} - {}{}", info.name, info.description, aliases);
        println!("               {:?}", info.capabilities);
    }
}
