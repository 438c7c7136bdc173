//! Build command - create an OPSI package from OPSI and CLIENT_DATA directories

use console::style;
use opsi_core::{ControlParser, assemble, parse_overrides};
use opsi_engine::{Escaping, Resolver};
use std::path::{Path, PathBuf};

use crate::error::{CliError, Result};
use crate::util::format_size;

/// Everything the build command needs, as given on the command line
#[derive(Debug)]
pub struct BuildOptions<'a> {
    pub opsi_dir: &'a Path,
    pub data_dir: &'a Path,
    pub control: &'a Path,
    pub into: &'a Path,
    pub keep: bool,
    pub strict: bool,
    pub escaping: Escaping,
    pub overrides: &'a [String],
}

pub fn run(opts: &BuildOptions<'_>) -> Result<PathBuf> {
    let overrides = parse_overrides(opts.overrides).map_err(|e| {
        CliError::usage_with_help(e.to_string(), "Usage: opsi-mkpkg [OPTIONS] [KEY=VALUE]...")
    })?;

    // Inputs must exist before any workbench is created
    require_dir(opts.opsi_dir)?;
    require_dir(opts.data_dir)?;
    if !opts.control.is_file() {
        return Err(CliError::missing_input(format!(
            "missing control file {}",
            opts.control.display()
        )));
    }

    // raw bytes: control files need not be UTF-8
    let raw = std::fs::read(opts.control)
        .map_err(|e| CliError::io(format!("error reading {}", opts.control.display()), e))?;
    tracing::info!(
        "using control file {}, into {}",
        opts.control.display(),
        opts.into.display()
    );

    let resolved = Resolver::builder()
        .strict(opts.strict)
        .escaping(opts.escaping)
        .build()
        .resolve_bytes(&raw, &overrides)?;

    let parsed = ControlParser::new()
        .strict(opts.strict)
        .parse_reader(resolved.as_slice())?;
    for skipped in &parsed.skipped {
        tracing::warn!(
            "ignoring control file line {} ({}): {}",
            skipped.line,
            skipped.reason,
            skipped.content
        );
    }

    let workbench = tempfile::Builder::new()
        .prefix("opsi-")
        .tempdir()
        .map_err(|e| CliError::io("cannot create workbench", e))?;

    let result = assemble(
        &resolved,
        opts.opsi_dir,
        opts.data_dir,
        opts.into,
        workbench.path(),
    );

    // Workbench goes away on success and failure alike, unless kept for debugging
    if opts.keep {
        let path = workbench.keep();
        tracing::info!("keeping workbench {}", path.display());
    } else {
        tracing::info!("removing workbench {}", workbench.path().display());
        if let Err(e) = workbench.close() {
            tracing::warn!("cannot remove workbench: {e}");
        }
    }

    let package = result?;
    print_summary(&package);
    Ok(package)
}

fn require_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(CliError::missing_input(format!(
            "missing expected directory {}",
            dir.display()
        )))
    }
}

fn print_summary(package: &Path) {
    println!(
        "{} {}",
        style("Created").green().bold(),
        package.display()
    );
    if let Ok(metadata) = std::fs::metadata(package) {
        println!("  {} {}", style("Size").dim(), format_size(metadata.len()));
    }
}
