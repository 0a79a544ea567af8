mod analysis;
mod config;
mod engine;
mod manager;
mod model;
mod stats;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
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
    Create,

    Run,

    Step,

    Reset,

    Set {
        #[arg(long)]
        signal: Option<Signal>,

        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=99))]
        vehicles: Option<u32>,
    },

    Toggle,

    Show,

    Analyze,

    Clean,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Signal {
    Red,
    Green,
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
        Command::Create => mgr.create_session()?,
        Command::Run => mgr.run_session()?,
        Command::Step => mgr.step_session()?,
        Command::Reset => mgr.reset_session()?,
        Command::Set { signal, vehicles } => {
            let signal_is_red = signal.map(|signal| matches!(signal, Signal::Red));
            mgr.set_controls(signal_is_red, vehicles)?
        }
        Command::Toggle => mgr.toggle_session()?,
        Command::Show => mgr.show_session()?,
        Command::Analyze => mgr.analyze_session()?,
        Command::Clean => mgr.clean_session()?,
    }

    Ok(())
}
