//! Run command implementation.

use std::time::{Duration, Instant};

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use qhiffs_core::{LocalCluster, NeverConverge, NormBelow, TransportKind};

use super::common::{StateReport, initial_state, load_config, load_hamiltonian, write_report};
use crate::SetupArgs;

/// Execute the run command.
pub async fn execute(
    setup: &SetupArgs,
    initial: &str,
    transport: &str,
    converge_below: Option<f64>,
    output: Option<&str>,
) -> Result<()> {
    let config = load_config(setup)?;
    let hamiltonian = load_hamiltonian(setup, config.states)?;
    let transport: TransportKind = transport.parse()?;
    let state = initial_state(initial, config.states)?;

    eprintln!(
        "{} Running {} amplitudes on {} nodes ({} steps, {}, {})",
        style("→").cyan().bold(),
        style(config.states).green(),
        style(setup.nodes).yellow(),
        config.step_count,
        config.backend,
        transport
    );

    let cluster = LocalCluster::new(config, hamiltonian, setup.nodes, transport);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("evolving");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let started = Instant::now();
    let result = match converge_below {
        Some(threshold) => cluster.run(state, NormBelow(threshold)).await,
        None => cluster.run(state, NeverConverge).await,
    };
    spinner.finish_and_clear();

    let outcome = result?;
    let Some(first) = outcome.outcomes.first() else {
        anyhow::bail!("Cluster returned no outcomes");
    };

    eprintln!(
        "{} {} cycles in {:.2?} ({:?})",
        style("✓").green().bold(),
        first.cycles,
        started.elapsed(),
        first.stop
    );

    let report = StateReport::new(first.cycles, first.stop, &first.amplitudes);
    write_report(&report, output)?;
    if let Some(path) = output {
        eprintln!("  Written: {}", style(path).green());
    }
    Ok(())
}
