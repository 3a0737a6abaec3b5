//! `ephemera` operator tool.
//!
//! # Usage
//!
//! ```bash
//! # KID of a seed
//! ephemera derive --seed 0101...01
//!
//! # Local generations of a device
//! EPHEMERA_STORE_KEY=... ephemera list --db keys.redb --device laptop
//!
//! # Drop old generations, keeping the newest three
//! ephemera prune --db keys.redb --device laptop --keep-latest 3
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ephemera_cli::{
    CliError, EntryLine, derive_kid, list_entries, open_store, prune_entries, retention_policy,
};
use ephemera_client::{DeviceId, EkConfig, Environment, SystemEnv};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Device ephemeral key store tool
#[derive(Parser, Debug)]
#[command(name = "ephemera")]
#[command(about = "Inspect and maintain the local device ephemeral key store")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the KID derived from a seed
    Derive {
        /// Hex-encoded 32-byte seed
        #[arg(long)]
        seed: String,
    },

    /// List the local generations of a device
    List(StoreArgs),

    /// Remove generations outside the retention policy
    Prune {
        #[command(flatten)]
        store: StoreArgs,

        /// Published generations always kept
        #[arg(long)]
        keep_latest: Option<usize>,

        /// Minimum age before a generation may be removed
        #[arg(long)]
        max_age_days: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Path to the key store database
    #[arg(long)]
    db: PathBuf,

    /// Device whose generations to operate on
    #[arg(long)]
    device: String,

    /// Hex-encoded 32-byte store key
    #[arg(long, env = "EPHEMERA_STORE_KEY", hide_env_values = true)]
    store_key: String,
}

#[allow(clippy::print_stdout)]
fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Command::Derive { seed } => {
            println!("{}", derive_kid(&seed)?);
        },
        Command::List(args) => {
            let store = open_store(&args.db, &args.store_key)?;
            for summary in list_entries(&store, &DeviceId::new(args.device))? {
                println!("{}", EntryLine(&summary));
            }
        },
        Command::Prune { store: args, keep_latest, max_age_days } => {
            let store = open_store(&args.db, &args.store_key)?;
            let policy = retention_policy(&EkConfig::default(), keep_latest, max_age_days);
            let now = SystemEnv::new().wall_clock_secs();
            let removed = prune_entries(&store, &DeviceId::new(args.device), &policy, now)?;
            println!("removed {removed} entries");
        },
    }

    Ok(())
}
