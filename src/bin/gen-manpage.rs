//! Man page generator for avrfuse
//!
//! Writes `avrfuse.1` plus one `avrfuse-<command>.1` page per subcommand.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::{Command, CommandFactory};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

/// Render one page named after the command into `dir`
fn render(cmd: Command, dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(format!("{}.1", cmd.get_name()));
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;
    fs::write(&path, buffer)?;
    Ok(path)
}

fn main() -> io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("man"), PathBuf::from);
    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    let mut pages = Vec::new();
    for sub in cmd.get_subcommands().filter(|sub| !sub.is_hide_set()) {
        let page = sub
            .clone()
            .name(format!("{}-{}", cmd.get_name(), sub.get_name()))
            .bin_name(format!("{} {}", cmd.get_name(), sub.get_name()));
        pages.push(render(page, &output_dir)?);
    }
    let main_page = render(cmd, &output_dir)?;

    println!("Man pages generated in: {}", output_dir.display());
    for page in std::iter::once(&main_page).chain(&pages) {
        println!("  {}", page.display());
    }

    println!("\nTo view the main page:");
    println!("  man -l {}", main_page.display());
    println!("\nTo install system-wide (requires sudo):");
    println!(
        "  sudo cp {}/*.1 /usr/local/share/man/man1/",
        output_dir.display()
    );
    println!("  sudo mandb");

    Ok(())
}
