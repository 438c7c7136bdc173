//! opsi-mkpkg - Build OPSI packages without the OPSI toolchain

use clap::{Args, Parser, Subcommand, ValueEnum};
use opsi_engine::Escaping;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;
mod util;

#[derive(Parser)]
#[command(name = "opsi-mkpkg")]
#[command(author = "opsi-mkpkg Contributors")]
#[command(version)]
#[command(about = "Create an OPSI package from OPSI and CLIENT_DATA directories", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    build: BuildArgs,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Args)]
struct BuildArgs {
    /// OPSI directory used as input
    #[arg(long, env = "OPSI_MKPKG_OPSIDIR", default_value = "./OPSI")]
    opsidir: PathBuf,

    /// Data directory used as input
    #[arg(long, env = "OPSI_MKPKG_DATADIR", default_value = "./CLIENT_DATA")]
    datadir: PathBuf,

    /// OPSI control file
    #[arg(long, env = "OPSI_MKPKG_CONTROL", default_value = "./OPSI/control")]
    control: PathBuf,

    /// OPSI package destination directory
    #[arg(long, env = "OPSI_MKPKG_INTO", default_value = ".")]
    into: PathBuf,

    /// Keep the interim workbench for debugging purposes
    #[arg(long)]
    keep: bool,

    /// Fail on malformed control file lines and placeholders without a value
    #[arg(long)]
    strict: bool,

    /// Escaping applied to substituted values
    #[arg(long, value_enum, default_value_t = EscapeArg::None)]
    escape: EscapeArg,

    /// Control file template values (key=value)
    #[arg(value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the contents and metadata of a built package
    Inspect {
        /// Package file (.opsi)
        package: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EscapeArg {
    /// Insert values verbatim
    None,
    /// Escape HTML special characters
    Html,
}

impl From<EscapeArg> for Escaping {
    fn from(arg: EscapeArg) -> Self {
        match arg {
            EscapeArg::None => Escaping::None,
            EscapeArg::Html => Escaping::Html,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(console::colors_enabled_stderr())
        .with_target(false)
        .init();
}

fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_logging(cli.debug);

    let result = match cli.command {
        Some(Commands::Inspect { package, json }) => commands::inspect::run(&package, json),
        None => {
            let args = &cli.build;
            commands::build::run(&commands::build::BuildOptions {
                opsi_dir: &args.opsidir,
                data_dir: &args.datadir,
                control: &args.control,
                into: &args.into,
                keep: args.keep,
                strict: args.strict,
                escaping: args.escape.into(),
                overrides: &args.overrides,
            })
            .map(|_| ())
        }
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
