//! lst: inspect and garbage-collect a lightstore.

mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use lightstore_lib::StorageSettings;

use crate::output::{OutputFormat, print_error};

/// lightstore - content-addressed build cache
#[derive(Parser)]
#[command(name = "lst")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Store root (default: $LIGHTSTORE_ROOT or the user data directory)
  #[arg(long, global = true, value_name = "PATH")]
  store: Option<PathBuf>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
  /// List derivations, or the realizations of one derivation
  Ls {
    /// Derivation to list realizations of
    dref: Option<String>,
  },

  /// Show a derivation's config or a realization's metadata
  Show {
    /// A dref:... or rref:... reference
    reference: String,
  },

  /// Print the store path of a reference
  Path {
    /// A dref:... or rref:... reference
    reference: String,
  },

  /// Remove store entries not reachable from the kept references
  Gc {
    /// Derivation to keep, with its dependencies (repeatable)
    #[arg(long = "keep", value_name = "DREF")]
    keep: Vec<String>,

    /// Realization to keep, with everything it was built against (repeatable)
    #[arg(long = "keep-rref", value_name = "RREF")]
    keep_rref: Vec<String>,

    /// Report what would be removed without deleting anything
    #[arg(long)]
    dry_run: bool,
  },
}

fn init_logging(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn settings(store: Option<PathBuf>) -> Result<StorageSettings> {
  match store {
    Some(root) => Ok(StorageSettings::new(root)),
    None => StorageSettings::from_env().context("Cannot determine the store location"),
  }
}

fn run(cli: Cli) -> Result<()> {
  let settings = settings(cli.store)?;
  let output = cli.output;
  debug!(store = %settings.store().display(), command = ?cli.command, "running command");

  match cli.command {
    Commands::Ls { dref } => cmd::cmd_ls(&settings, dref.as_deref(), output),
    Commands::Show { reference } => cmd::cmd_show(&settings, &reference, output),
    Commands::Path { reference } => cmd::cmd_path(&settings, &reference, output),
    Commands::Gc {
      keep,
      keep_rref,
      dry_run,
    } => cmd::cmd_gc(&settings, &keep, &keep_rref, dry_run, output),
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      print_error(&format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}
