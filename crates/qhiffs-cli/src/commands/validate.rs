//! Validate command implementation.

use anyhow::Result;
use console::style;

use qhiffs_core::NodeTopology;

use super::common::{load_config, load_hamiltonian};
use crate::SetupArgs;

/// Execute the validate command.
pub fn execute(setup: &SetupArgs) -> Result<()> {
    let config = load_config(setup)?;
    let hamiltonian = load_hamiltonian(setup, config.states)?;

    let mut layout = None;
    for rank in 0..setup.nodes.max(1) {
        layout = Some(config.validate(&NodeTopology::new(setup.nodes, rank)?)?);
    }
    let Some(layout) = layout else {
        anyhow::bail!("No nodes to validate");
    };

    println!(
        "{} {} amplitudes across {} nodes ({} each)",
        style("✓").green().bold(),
        layout.states(),
        layout.total_nodes(),
        layout.local_size()
    );
    println!("  Backend:     {}", config.backend);
    println!("  Steps:       {}", config.step_count);
    println!("  Hamiltonian: {} ({} factors)", hamiltonian.kind(), hamiltonian.len());
    println!(
        "  Correction:  fma(x, {}, {}) in blocks of {}",
        config.correction.coefficient, config.correction.offset, config.vector_width
    );
    match config.sync_timeout() {
        Some(timeout) => println!("  Timeout:     {timeout:?}"),
        None => println!("  Timeout:     {}", style("none").dim()),
    }
    for rank in 0..layout.total_nodes() {
        let range = layout.range(rank);
        println!("  rank {rank:>3}: {}..{}", range.start, range.end);
    }
    Ok(())
}
