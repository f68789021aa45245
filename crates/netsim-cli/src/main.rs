use anyhow::{Context, Result};
use clap::Parser;
use netsim_core::Simulator;
use netsim_types::Scenario;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Runs a network simulation scenario from a TOML file to completion and
/// reports the outcome.
#[derive(Parser, Debug)]
#[command(author, version, about = "Discrete-event packet network simulator")]
struct Args {
    /// Scenario file to run.
    scenario: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let scenario = load_scenario(&args.scenario)?;
    info!(name = %scenario.name, "running scenario");
    if !scenario.description.is_empty() {
        info!(description = %scenario.description);
    }

    match Simulator::run_scenario(&scenario) {
        Ok(sim) => {
            info!("all assertions passed");
            report(&scenario, &sim);
            Ok(())
        }
        Err(failure) => {
            anyhow::bail!("scenario failed: {failure}");
        }
    }
}

fn load_scenario(path: &PathBuf) -> Result<Scenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse scenario file {}", path.display()))
}

fn report(scenario: &Scenario, sim: &Simulator) {
    for link in &scenario.topology.links {
        let Some(src) = sim.storage.node_by_id(&link.src) else { continue };
        let Some(dst) = sim.storage.node_by_id(&link.dst) else { continue };
        let Some(link_index) = sim.storage.find_link(src, dst, link.src_port, link.dst_port) else {
            continue;
        };
        info!(
            src = %link.src,
            dst = %link.dst,
            bytes_tx = sim.link_pipe_bytes_tx(link_index),
            packets_tx = sim.link_pipe_packets_tx(link_index),
            packets_dropped = sim.link_queue_packets_dropped(link_index),
            "link summary"
        );
    }
}
