//! Inspect command - view package contents without extracting

use console::style;
use opsi_core::{ArchiveEntry, inspect_package};
use std::path::Path;

use crate::error::{CliError, Result};
use crate::util::format_size;

pub fn run(package: &Path, json: bool) -> Result<()> {
    if !package.is_file() {
        return Err(CliError::missing_input(format!(
            "missing package {}",
            package.display()
        )));
    }

    let info = inspect_package(package)?;

    if json {
        let out = serde_json::to_string_pretty(&info)
            .map_err(|e| CliError::io("cannot serialize package info", e.into()))?;
        println!("{out}");
        return Ok(());
    }

    let name = package
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| package.display().to_string());
    println!("{} {}", style("Package").cyan().bold(), name);
    println!();

    print_entries("Container", &info.entries);
    print_entries(opsi_core::OPSI_ARCHIVE, &info.opsi);
    print_entries(opsi_core::CLIENT_DATA_ARCHIVE, &info.client_data);

    println!("{}:", style("Metadata").bold());
    for (key, value) in info.metadata.iter() {
        println!("  {:30} {}", key, value);
    }

    Ok(())
}

fn print_entries(title: &str, entries: &[ArchiveEntry]) {
    println!("{}:", style(title).bold());
    let files: Vec<_> = entries.iter().filter(|e| !e.is_dir).collect();
    if files.is_empty() {
        println!("  {}", style("(empty)").dim());
    }
    for entry in &files {
        println!("  {:40} {:>10}", entry.path, format_size(entry.size));
    }

    let total: u64 = files.iter().map(|e| e.size).sum();
    println!(
        "  {} {} file(s), {}",
        style("Total").dim(),
        files.len(),
        format_size(total)
    );
    println!();
}
