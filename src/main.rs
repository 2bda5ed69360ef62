//! # HTTPS Upgrade CLI
//!
//! Usage:
//!   https-upgrade classify <host>...
//!   https-upgrade digest <host>...
//!   https-upgrade refresh

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};

use https_upgrade::hasher;
use https_upgrade::storage::normalize_host;
use https_upgrade::{EngineConfig, EngineError, UpgradeEngine};

#[derive(Parser)]
#[command(name = "https-upgrade")]
#[command(about = "Classify hosts for HTTPS upgrade", long_about = None)]
struct Cli {
    /// Directory holding the local host store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Bulk dataset endpoint
    #[arg(long, global = true)]
    bulk_url: Option<String>,

    /// Prefix lookup endpoint
    #[arg(long, global = true)]
    lookup_url: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify hosts, printing host, verdict and source
    Classify {
        /// Hosts to classify
        #[arg(required = true)]
        hosts: Vec<String>,
    },

    /// Print the SHA-1 digest and lookup prefix of hosts (no network)
    Digest {
        /// Hosts to hash
        #[arg(required = true)]
        hosts: Vec<String>,
    },

    /// Re-fetch the bulk dataset into the local store
    Refresh,
}

fn init_logging(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}: [{}] {}",
                record.level().to_string().to_lowercase(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(io::stderr())
        .apply()
}

fn build_config(cli: &Cli) -> Result<EngineConfig, EngineError> {
    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = dir.clone();
    }
    if let Some(url) = &cli.bulk_url {
        config.remote.bulk_url = url.clone();
    }
    if let Some(url) = &cli.lookup_url {
        config.remote.lookup_url = url.clone();
    }
    Ok(config)
}

/// `host<TAB>digest<TAB>prefix`, using the prefix length `classify` sends.
fn digest_line(raw: &str, prefix_len: usize) -> String {
    match normalize_host(raw) {
        Some(host) => {
            let digest = hasher::digest(&host);
            let prefix = hasher::prefix(&digest, prefix_len);
            format!("{}\t{}\t{}", host, digest, prefix)
        }
        None => format!("{}\tinvalid", raw),
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Commands::Digest { hosts } => {
            let config = build_config(&cli)?;
            for raw in hosts {
                println!("{}", digest_line(raw, config.remote.prefix_len));
            }
        }
        Commands::Classify { hosts } => {
            let engine = UpgradeEngine::from_config(build_config(&cli)?).await?;
            for host in hosts {
                let c = engine.classify_detailed(host).await;
                println!("{}\t{}\t{}", host, c.verdict, c.source);
            }
            engine.shutdown().await;
        }
        Commands::Refresh => {
            let engine = UpgradeEngine::from_config(build_config(&cli)?).await?;
            let result = engine.refresh_service().refresh_now().await;
            engine.shutdown().await;
            let stats = result?;
            println!(
                "refreshed {} hosts ({} skipped) in {}ms",
                stats.hosts_refreshed, stats.hosts_skipped, stats.duration_ms
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_level) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
