//! b-cli: the `b` command.
//!
//! Pins project binaries and env files via `b.yaml` / `b.lock`:
//! - `b install`: install everything from the manifest
//! - `b update`: re-resolve versions and sync env files
//! - `b list`: show configured binaries and envs
//! - `b verify`: check every artifact against the lock
//! - `b cache`: manage the git clone cache

mod cmd;
mod output;
mod progress;
mod prompts;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "b")]
#[command(author, version, about = "Pinned binaries and env files for project workspaces")]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to b.yaml (default: discovered from the working directory)
  #[arg(short, long, global = true)]
  config: Option<String>,

  /// Suppress non-error output
  #[arg(short, long, global = true)]
  quiet: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Install binaries and env files from b.yaml
  #[command(alias = "i")]
  Install {
    /// Binaries or env refs to install (default: everything)
    names: Vec<String>,

    /// Reinstall even when already present
    #[arg(short, long)]
    force: bool,
  },

  /// Update binaries and env files to their latest allowed versions
  #[command(alias = "u")]
  Update {
    /// Binaries or env refs to update (default: everything)
    names: Vec<String>,

    /// Conflict strategy override: replace, client, merge
    #[arg(long)]
    strategy: Option<String>,

    /// Re-download even when up to date
    #[arg(short, long)]
    force: bool,
  },

  /// List configured binaries and envs with their versions
  #[command(alias = "ls")]
  List {
    /// Skip remote lookups for latest versions
    #[arg(long)]
    local: bool,
  },

  /// Verify installed artifacts against b.lock
  Verify,

  /// Manage the git clone cache
  Cache {
    #[command(subcommand)]
    command: cmd::cache::CacheCommands,
  },

  /// Write a starter b.yaml
  Init,

  /// Show version information
  #[command(alias = "v")]
  Version {
    /// Exit non-zero when any configured binary is out of date
    #[arg(long)]
    check: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  let shared = cmd::Shared {
    config: cli.config,
    quiet: cli.quiet,
  };

  match cli.command {
    Commands::Install { names, force } => cmd::install::run(&shared, names, force),
    Commands::Update { names, strategy, force } => cmd::update::run(&shared, names, strategy, force),
    Commands::List { local } => cmd::list::run(&shared, local),
    Commands::Verify => cmd::verify::run(&shared),
    Commands::Cache { command } => cmd::cache::run(&shared, command),
    Commands::Init => cmd::init::run(&shared),
    Commands::Version { check } => cmd::version::run(&shared, check),
  }
}
