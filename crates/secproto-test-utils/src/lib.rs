//! Testing utilities for the secproto workspace
//!
//! Fleet fixtures, single-host runners and assertions over the simulated
//! host state.

#![allow(missing_docs)]

use secproto_core::test_harness::{FleetSpec, SimulatedFleet, SimulatedHostSpec};
use secproto_core::{
    FleetRunner, HostOrchestrator, HostReport, ProtocolSet, ReconfigConfig, ServiceId, Transition,
};

/// Fleet with the given hosts, addressed directly
pub fn fleet_of(hosts: Vec<SimulatedHostSpec>) -> SimulatedFleet {
    SimulatedFleet::new(FleetSpec::new(hosts))
}

/// Orchestrator wired to a simulated fleet
pub fn orchestrator(fleet: &SimulatedFleet, config: ReconfigConfig) -> HostOrchestrator {
    HostOrchestrator::new(fleet.backends(), config)
}

/// Fleet runner wired to a simulated fleet
pub fn runner(fleet: &SimulatedFleet, transition: Transition) -> FleetRunner {
    FleetRunner::new(orchestrator(fleet, ReconfigConfig::new(transition)))
}

/// Reconfigure one simulated host and return the fleet for inspection
pub async fn run_single(spec: SimulatedHostSpec, config: ReconfigConfig) -> (SimulatedFleet, HostReport) {
    let target = spec.target();
    let fleet = fleet_of(vec![spec]);
    let report = orchestrator(&fleet, config).reconfigure(&target).await;
    (fleet, report)
}

/// Protocol set from probe-style labels
pub fn labels(labels: &[&str]) -> ProtocolSet {
    ProtocolSet::from_probe_labels(labels, "fixture").unwrap()
}

/// `after` of a service record; panics when absent
pub fn after_of(report: &HostReport, service: ServiceId) -> ProtocolSet {
    report
        .record(service)
        .and_then(|r| r.after.clone())
        .unwrap_or_else(|| panic!("no after-set recorded for {service}"))
}

/// No command that changes host state was issued
pub fn assert_no_mutation(fleet: &SimulatedFleet, host: &str) {
    let mutating = fleet.mutating_commands(host);
    assert!(
        mutating.is_empty(),
        "expected no mutating commands on {host}, got {mutating:#?}"
    );
}

/// Channel closed and remote access back to its starting state
pub fn assert_finalized(fleet: &SimulatedFleet, host: &str, remote_access_was_running: bool) {
    assert_eq!(fleet.open_channels(host), 0, "channel left open on {host}");
    let (starts, stops) = fleet.remote_access_toggles(host);
    if remote_access_was_running {
        assert_eq!((starts, stops), (0, 0), "remote access toggled on {host}");
    } else {
        assert_eq!(starts, stops, "remote access left running on {host}");
    }
}

/// Position of the first logged command containing `fragment`
pub fn command_index(fleet: &SimulatedFleet, host: &str, fragment: &str) -> Option<usize> {
    fleet
        .command_log(host)
        .iter()
        .position(|c| c.contains(fragment))
}
