//! QHiFFS Command-Line Interface
//!
//! Runs a distributed synchronize / evolve / correct simulation on a local
//! cluster of in-process nodes.
//!
//! ```text
//! qhiffs run --states 1024 --nodes 4 --steps 10 -o state.json
//! qhiffs validate --config run.yaml --nodes 8
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Args, Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{run, validate, version};

/// QHiFFS - distributed state-vector evolution
#[derive(Parser)]
#[command(name = "qhiffs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `run` and `validate`.
#[derive(Args, Debug, Clone)]
pub struct SetupArgs {
    /// Configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Number of amplitudes (overrides the configuration file)
    #[arg(short, long)]
    states: Option<usize>,

    /// Number of nodes
    #[arg(short, long, env = "QHIFFS_NODES", default_value = "1")]
    nodes: usize,

    /// Number of cycles (overrides the configuration file)
    #[arg(long)]
    steps: Option<u64>,

    /// Evolution backend (accelerator, host-vector)
    #[arg(short, long)]
    backend: Option<String>,

    /// Correction block width (overrides the configuration file)
    #[arg(long)]
    vector_width: Option<usize>,

    /// Barrier timeout in milliseconds
    #[arg(long, env = "QHIFFS_SYNC_TIMEOUT_MS")]
    sync_timeout_ms: Option<u64>,

    /// Hamiltonian file (JSON or YAML); a uniform diagonal is used if omitted
    #[arg(long)]
    hamiltonian: Option<String>,

    /// Coefficient of the uniform diagonal Hamiltonian
    #[arg(long, default_value = "1.0")]
    coefficient: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the evolve / synchronize / correct cycle on a local cluster
    Run {
        #[command(flatten)]
        setup: SetupArgs,

        /// Initial state (uniform, basis:<index>)
        #[arg(short, long, default_value = "uniform")]
        initial: String,

        /// In-process transport (shared-memory, channels)
        #[arg(short, long, default_value = "shared-memory")]
        transport: String,

        /// Stop once the squared norm drops below this value
        #[arg(long)]
        converge_below: Option<f64>,

        /// Output file for the final state (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Check a configuration against a topology without running it
    Validate {
        #[command(flatten)]
        setup: SetupArgs,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Execute command
    let result = match cli.command {
        Commands::Run {
            setup,
            initial,
            transport,
            converge_below,
            output,
        } => {
            run::execute(
                &setup,
                &initial,
                &transport,
                converge_below,
                output.as_deref(),
            )
            .await
        }

        Commands::Validate { setup } => validate::execute(&setup),

        Commands::Version => {
            version::execute();
            Ok(())
        }
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
