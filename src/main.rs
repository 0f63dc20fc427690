mod allocator;
mod analysis;
mod baseline;
mod config;
mod contagion;
mod evolution;
mod features;
mod fitness;
mod manager;
mod measures;
mod network;
mod program;
mod rewire;
mod simulation;
mod state;
mod stats;

use crate::baseline::StrategyName;
use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evolve mitigation strategies.
    Evolve,

    /// Evaluate a baseline (none, random, traveler, degree:K) or the best evolved strategy.
    Evaluate {
        #[arg(long)]
        strategy: StrategyName,

        #[arg(long, default_value_t = 10)]
        n_runs: usize,

        /// Generate a fresh topology for every run.
        #[arg(long)]
        new_topology: bool,
    },

    Analyze,

    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Evolve => mgr.evolve().context("failed to evolve strategies")?,
        Command::Evaluate {
            strategy,
            n_runs,
            new_topology,
        } => mgr
            .evaluate(strategy, n_runs, new_topology)
            .context("failed to evaluate strategy")?,
        Command::Analyze => mgr.analyze().context("failed to analyze sim")?,
        Command::Clean => mgr.clean().context("failed to clean sim")?,
    }

    Ok(())
}
