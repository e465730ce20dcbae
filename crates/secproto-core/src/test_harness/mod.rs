//! Test harness: simulated fleet and simulation runner

mod simulator;

pub use simulator::{
    FleetSpec, ProbeOverride, SimulatedChannel, SimulatedFleet, SimulatedHostSpec,
};

use crate::config::ReconfigConfig;
use crate::fleet::FleetRunner;
use crate::host::Credentials;
use crate::orchestrator::HostOrchestrator;
use crate::report::FleetReport;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Run a simulated fleet through the real orchestrator.
///
/// With an inventory endpoint in the fleet spec, hosts are resolved through
/// the simulated inventory; otherwise they are addressed directly.
pub async fn run_simulation(
    fleet: &SimulatedFleet,
    config: ReconfigConfig,
    stop: Arc<AtomicBool>,
) -> FleetReport {
    let orchestrator = HostOrchestrator::new(fleet.backends(), config);
    let runner = FleetRunner::new(orchestrator).with_stop_flag(stop);
    let targets = fleet.targets();

    match fleet.spec().inventory_endpoint.as_deref() {
        Some(endpoint) => {
            runner
                .run_with_inventory(fleet, endpoint, &Credentials::new("administrator", ""), &targets)
                .await
        }
        None => runner.run(&targets).await,
    }
}
