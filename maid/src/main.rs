use anyhow::{bail, Context};
use clap::Parser;
use maid::{
    backend::Backends,
    clock::SystemClock,
    config::{default_config_path, MaidConfig},
    liveness::ProcessTable,
    maid::Maid,
};
use std::{
    io::{self, Write},
    path::PathBuf,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Regular housekeeping for replicated data. Run at least daily!
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// do a task, even if it is not due yet
    #[arg(short, long)]
    eager: bool,

    /// list all tasks with their dueness and last known state, then exit
    #[arg(short, long, conflicts_with = "eager")]
    list: bool,

    /// maid configuration file
    #[arg(short, long, env = "MAID_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = MaidConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration {:?}", args.config))?;
    debug!(config = ?config, "Loaded configuration");

    if config.preflight_checks() {
        bail!("Configuration {:?} failed the preflight checks", args.config);
    }

    let backend = Backends::load(&config.backend).context("Failed to load backend")?;
    let mut maid = Maid::load(
        &config,
        Box::new(backend),
        Box::new(ProcessTable),
        Box::new(SystemClock),
    )
    .context("Failed to load tasks")?;

    if args.list {
        for status in maid.status()? {
            println!("{status}");
        }

        return Ok(());
    }

    // announce the selection before a possibly long replication starts
    let plan = maid.plan(args.eager)?;
    print!("{plan}");
    io::stdout().flush().context("Failed to write to stdout")?;

    if let Some(task) = plan.selected {
        if maid.do_task(&task)? {
            println!("Done.");
        } else {
            println!("Failed.");
        }
    }

    Ok(())
}
