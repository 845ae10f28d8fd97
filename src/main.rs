//! avrfuse - AVR fuse and lock-bit settings editor
//!
//! Settings live in small `KEY=VALUE` documents (`.fuses` / `.locks`) that
//! name an MCU and the values of its bitfields. Every command that touches a
//! document goes through the same document engine an interactive editor
//! would use, so `set` and `switch` rewrite documents exactly like a GUI
//! would.
//!
//! # Architecture
//!
//! - Part descriptions (`.atdf` / `.xml`) are read lazily by a
//!   `DescriptorRepository` built once at startup
//! - Documents are opened into a `DocumentSync` over an in-memory buffer
//! - Finished values are turned into avrdude `-U` arguments

mod cli;
mod commands;
mod config;

use std::path::{Path, PathBuf};

use avrfuse_core::descriptor::{DescriptorRepository, Fixups, FuseType};
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = Config::load(cli.config.as_deref())?;

    let repo = match load_repository(&cli, &config) {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("Failed to load part descriptions: {}", e);
            std::process::exit(1);
        }
    };

    log::debug!("Found {} part descriptions", repo.len());

    match cli.command {
        Commands::ListMcus { filter } => {
            commands::list_mcus(&repo, filter.as_deref());
            Ok(())
        }
        Commands::Show { mcu, lockbits } => {
            commands::show_mcu(&repo, &mcu, fuse_type(lockbits))
        }
        Commands::ListInterfaces => {
            commands::list_interfaces();
            Ok(())
        }
        Commands::New {
            mcu,
            output,
            lockbits,
            defaults,
            summary,
            force,
        } => commands::cmd_new(
            &repo,
            &output,
            &mcu,
            commands::NewOptions {
                fuse_type: if lockbits {
                    FuseType::Lockbits
                } else {
                    commands::fuse_type_for(&output)
                },
                defaults,
                summary: summary.as_deref(),
                force,
            },
        ),
        Commands::Check { file } => commands::cmd_check(&repo, &file),
        Commands::Set { file, assignments } => commands::cmd_set(&repo, &file, &assignments),
        Commands::Switch {
            file,
            mcu,
            no_carry,
        } => commands::cmd_switch(&repo, &file, &mcu, !no_carry),
        Commands::Avrdude {
            file,
            interface,
            mcu,
            verify,
            args_only,
        } => commands::cmd_avrdude(
            &repo,
            &file,
            &config.programmer,
            commands::AvrdudeOptions {
                interface: interface.as_deref(),
                mcu: mcu.as_deref(),
                verify,
                args_only,
            },
        ),
    }
}

fn fuse_type(lockbits: bool) -> FuseType {
    if lockbits {
        FuseType::Lockbits
    } else {
        FuseType::Fuse
    }
}

/// Build the part description repository from the command line, the
/// configuration file or the default locations
fn load_repository(
    cli: &Cli,
    config: &Config,
) -> Result<DescriptorRepository, Box<dyn std::error::Error>> {
    let mut fixups = Fixups::builtin();
    if let Some(path) = &config.fixups {
        fixups.extend(Fixups::load_file(path)?);
        log::debug!("Loaded extra fix-ups from {}", path.display());
    }

    let mut repo = DescriptorRepository::new().with_fixups(fixups);

    if !cli.no_cache {
        let cache_dir = cli
            .cache_dir
            .clone()
            .or_else(|| config.cache_dir.clone())
            .or_else(Config::default_cache_dir);
        if let Some(dir) = cache_dir {
            log::debug!("Caching part descriptions in {}", dir.display());
            repo = repo.with_cache_dir(dir);
        }
    }

    if let Some(dir) = cli.devices.as_deref().or(config.devices_dir.as_deref()) {
        // User specified a directory
        add_source(&mut repo, dir)?;
    } else {
        // Try default locations
        let default_paths = [
            PathBuf::from("devices"),
            PathBuf::from("/usr/share/avrfuse/devices"),
            PathBuf::from("/usr/local/share/avrfuse/devices"),
        ];

        let mut loaded = false;
        for dir in &default_paths {
            if dir.is_dir() {
                match repo.add_dir(dir) {
                    Ok(count) => {
                        log::debug!("Found {} part descriptions in {}", count, dir.display());
                        loaded = true;
                    }
                    Err(e) => {
                        log::warn!("Failed to scan {}: {}", dir.display(), e);
                    }
                }
            }
        }

        if !loaded {
            log::warn!("No part descriptions found in default locations");
        }
    }

    Ok(repo)
}

fn add_source(
    repo: &mut DescriptorRepository,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if path.is_dir() {
        repo.add_dir(path)?;
    } else if path.is_file() {
        repo.add_file(path);
    } else {
        return Err(format!("Part description path not found: {}", path.display()).into());
    }
    Ok(())
}
