//! The lattice replica binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lattice", about = "Sharded BFT replica with cross-shard commitment")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write an example shard-config JSON.
    Example {
        /// Directory to write the example config into.
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Bootstrap per-node directories from a shard config.
    Generate {
        /// The shard topology JSON.
        #[arg(long, default_value = "./example-shard-config.json")]
        config: PathBuf,

        /// Testnet root directory.
        #[arg(long, default_value = "./mytestnet")]
        root: PathBuf,
    },

    /// Launch a replica from its node directory.
    Start {
        /// The node directory.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Wall-clock HH:MM deadline for starting the sender.
        #[arg(long)]
        start_time: Option<String>,

        /// Seconds between sender start and consensus start.
        #[arg(long, default_value_t = 10)]
        wait_time: u64,

        /// Reap transactions every view instead of every sixth view.
        #[arg(long, default_value_t = true)]
        enable_pipeline: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Example { root } => {
            let path = root.join("example-shard-config.json");
            lattice_node::example_shard_config().write_json(&path)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        Command::Generate { config, root } => {
            lattice_node::generate_config_files(&config, &root)
        }
        Command::Start {
            root,
            start_time,
            wait_time,
            enable_pipeline,
        } => lattice_node::init_node(&root, start_time.as_deref(), wait_time, enable_pipeline),
    }
}
