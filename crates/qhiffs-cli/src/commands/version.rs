//! Version command implementation.

use console::style;

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - distributed state-vector evolution",
        style("QHiFFS").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  qhiffs-core  Partitioning, passes, collective sync, orchestration");
    println!("  qhiffs-cli   Command-line interface");
    println!();
    println!("Backends:     accelerator, host-vector");
    println!("Transports:   shared-memory, channels");
    println!("License:      {}", style("Apache-2.0").dim());
}
