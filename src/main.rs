//! `loam`: voxel world server and client sync, run as an in-process simulation.
#![forbid(unsafe_code)]

mod config;
mod logging;
mod sim;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::config::{LoamConfig, load_config_from_path};
use crate::sim::{SimOptions, run_simulation};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML file with [server], [client] and [world] sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write debug logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a server and loopback clients in this process
    Simulate {
        #[arg(long, default_value_t = 2)]
        clients: usize,
        #[arg(long, default_value_t = 600)]
        ticks: u32,
        /// Pace ticks at the configured server step
        #[arg(long)]
        realtime: bool,
    },
    /// Print the default configuration as TOML
    Defaults,
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = match &cli.config {
        Some(path) => load_config_from_path(path)?,
        None => LoamConfig::default(),
    };
    match cli.command {
        Cmd::Defaults => {
            print!("{}", LoamConfig::default().to_toml()?);
        }
        Cmd::Simulate {
            clients,
            ticks,
            realtime,
        } => {
            let report = run_simulation(
                &cfg,
                &SimOptions {
                    clients,
                    ticks,
                    realtime,
                },
            )?;
            log::info!(
                "{} ticks in {:.2?}: server sent {} blocks ({} generated, {} acks, {} edits), {} held in memory, {} stored",
                report.ticks,
                report.elapsed,
                report.server.blocks_sent,
                report.server.generated,
                report.server.acks,
                report.server.edits,
                report.server_blocks,
                report.stored_blocks
            );
            for c in &report.clients {
                log::info!(
                    "{}: {} blocks, {} meshes, {} acks, {} evictions, {} unloaded",
                    c.name,
                    c.blocks,
                    c.meshes,
                    c.stats.acks_sent,
                    c.stats.evictions,
                    c.stats.unloaded
                );
            }
            log::info!("{} distinct blocks across clients", report.covered_blocks);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init_logging(cli.log_file.as_deref(), cli.verbose) {
        eprintln!("cannot set up logging: {e}");
        return ExitCode::FAILURE;
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
