//! Skylark - multirotor state estimator

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "skylark")]
#[command(about = "Multirotor state estimator with a simulated flight front end")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fly the simulated vehicle and run one estimator over its sensor stream
    Simulate {
        #[command(flatten)]
        run: cli::RunArgs,
        #[command(flatten)]
        out: cli::OutputArgs,
    },
    /// Re-run the estimator over one flight for a range of parameter values
    Sweep {
        #[command(flatten)]
        run: cli::RunArgs,
        #[command(flatten)]
        sweep: cli::SweepArgs,
        #[command(flatten)]
        out: cli::OutputArgs,
    },
    /// List tunable parameters and their defaults
    Params {
        #[arg(short, long, value_enum, default_value = "extended")]
        variant: cli::Variant,

        /// Write the default configuration as JSON
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();

    match args.command {
        Commands::Simulate { run, out } => cli::run_simulate(&run, &out),
        Commands::Sweep { run, sweep, out } => cli::run_sweep(&run, &sweep, &out),
        Commands::Params { variant, write } => cli::run_params(variant, write.as_deref()),
    }
}
