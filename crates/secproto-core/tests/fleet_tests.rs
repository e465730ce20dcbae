use async_trait::async_trait;
use pretty_assertions::assert_eq;
use secproto_core::test_harness::{run_simulation, FleetSpec, SimulatedFleet, SimulatedHostSpec};
use secproto_core::{
    Backends, ChannelConnector, ChannelError, CommandChannel, Credentials, FleetRunner,
    HostOrchestrator, HostOutcome, ReconfigConfig, Transition,
};
use secproto_test_utils::{fleet_of, runner};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connector that raises the stop flag as soon as a channel is opened
struct StopOnOpen {
    inner: SimulatedFleet,
    stop: Arc<AtomicBool>,
}

#[async_trait]
impl ChannelConnector for StopOnOpen {
    async fn open(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn CommandChannel>, ChannelError> {
        self.stop.store(true, Ordering::SeqCst);
        self.inner.open(address, credentials).await
    }
}

#[tokio::test]
async fn run_continues_after_failed_host() {
    let fleet = fleet_of(vec![
        SimulatedHostSpec::baseline("esx-01").with_legacy_enabled(),
        SimulatedHostSpec::baseline("esx-02").unreachable(),
        SimulatedHostSpec::legacy_a("esx-03").with_legacy_enabled(),
    ]);

    let report = runner(&fleet, Transition::DisableLegacy)
        .run(&fleet.targets())
        .await;

    let names: Vec<&str> = report.hosts.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["esx-01", "esx-02", "esx-03"]);
    assert!(report.host("esx-01").unwrap().outcome.is_success());
    assert!(matches!(
        report.host("esx-02").unwrap().outcome,
        HostOutcome::ConnectionFailed { .. }
    ));
    assert!(report.host("esx-03").unwrap().outcome.is_success());
    assert!(report.summary().ends_with("(disable-legacy): 2/3 hosts fully applied"));

    let attention: Vec<&str> = report.needs_attention().map(|h| h.host.as_str()).collect();
    assert_eq!(attention, vec!["esx-02"]);
}

#[tokio::test]
async fn stop_before_run_processes_nothing() {
    let fleet = fleet_of(vec![SimulatedHostSpec::baseline("esx-01")]);
    let runner = runner(&fleet, Transition::EnableLegacy);
    runner.request_stop();

    let report = runner.run(&fleet.targets()).await;

    assert!(report.hosts.is_empty());
    assert!(fleet.command_log("esx-01").is_empty());
}

#[tokio::test]
async fn stop_during_host_finishes_that_host_only() {
    let fleet = fleet_of(vec![
        SimulatedHostSpec::baseline("esx-01"),
        SimulatedHostSpec::baseline("esx-02"),
    ]);
    let stop = Arc::new(AtomicBool::new(false));
    let backends = Backends::new(
        Arc::new(StopOnOpen {
            inner: fleet.clone(),
            stop: Arc::clone(&stop),
        }),
        Arc::new(fleet.clone()),
        Arc::new(fleet.clone()),
    );
    let orchestrator =
        HostOrchestrator::new(backends, ReconfigConfig::new(Transition::EnableLegacy));
    let runner = FleetRunner::new(orchestrator).with_stop_flag(stop);

    let report = runner.run(&fleet.targets()).await;

    assert_eq!(report.hosts.len(), 1);
    assert!(report.host("esx-01").unwrap().outcome.is_success());
    assert_eq!(fleet.open_channels("esx-01"), 0);
    assert!(fleet.command_log("esx-02").is_empty());
}

#[tokio::test]
async fn inventory_resolves_managed_and_standalone_hosts() {
    let fleet = SimulatedFleet::new(
        FleetSpec::new(vec![
            SimulatedHostSpec::baseline("esx-01").with_address("10.0.0.1"),
            SimulatedHostSpec::baseline("esx-02").not_in_inventory(),
            SimulatedHostSpec::legacy_b("esx-03")
                .with_address("10.0.0.3")
                .with_password("secret")
                .standalone()
                .not_in_inventory(),
        ])
        .with_inventory("vc.example"),
    );
    let runner = runner(&fleet, Transition::EnableLegacy);

    let report = runner
        .run_with_inventory(
            &fleet,
            "vc.example",
            &Credentials::new("administrator", ""),
            &fleet.targets(),
        )
        .await;

    assert!(report.host("esx-01").unwrap().outcome.is_success());
    match &report.host("esx-02").unwrap().outcome {
        HostOutcome::ConnectionFailed { message } => {
            assert!(message.contains("not found in inventory"), "{message}");
        }
        other => panic!("expected connection failure, got {other:?}"),
    }
    assert!(fleet.command_log("esx-02").is_empty());
    assert!(report.host("esx-03").unwrap().outcome.is_success());
    assert_eq!(fleet.channels_opened("esx-03"), 1);
}

#[tokio::test]
async fn failed_inventory_login_fails_every_managed_host() {
    let fleet = fleet_of(vec![
        SimulatedHostSpec::baseline("esx-01"),
        SimulatedHostSpec::baseline("esx-02"),
    ]);
    let runner = runner(&fleet, Transition::DisableLegacy);

    let report = runner
        .run_with_inventory(
            &fleet,
            "unknown-endpoint",
            &Credentials::new("administrator", ""),
            &fleet.targets(),
        )
        .await;

    assert_eq!(report.hosts.len(), 2);
    assert!(report
        .hosts
        .values()
        .all(|h| matches!(h.outcome, HostOutcome::ConnectionFailed { .. })));
    assert_eq!(fleet.channels_opened("esx-01"), 0);
}

#[tokio::test]
async fn simulation_from_toml_uses_inventory() {
    let spec = FleetSpec::from_toml_str(
        r#"
        inventory_endpoint = "vcenter.lab"

        [[hosts]]
        name = "esx-01"
        legacy_enabled = true

        [[hosts]]
        name = "esx-02"
        update = 2
        "#,
    )
    .unwrap();
    let fleet = SimulatedFleet::new(spec);
    let config = ReconfigConfig::new(Transition::DisableLegacy);

    let report = run_simulation(&fleet, config, Arc::new(AtomicBool::new(false))).await;

    assert_eq!(report.hosts.len(), 2);
    assert!(report.host("esx-01").unwrap().outcome.is_success());
    assert!(matches!(
        report.host("esx-02").unwrap().outcome,
        HostOutcome::SkippedUnsupported { .. }
    ));
}

#[tokio::test]
async fn fleet_report_serializes_outcomes() {
    let fleet = fleet_of(vec![
        SimulatedHostSpec::baseline("esx-01"),
        SimulatedHostSpec::baseline("esx-02").with_stale_port(5989),
    ]);
    let report = runner(&fleet, Transition::EnableLegacy)
        .run(&fleet.targets())
        .await;

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["transition"], "enable_legacy");
    assert_eq!(json["hosts"]["esx-01"]["outcome"]["outcome"], "fully_applied");
    assert_eq!(json["hosts"]["esx-02"]["outcome"]["outcome"], "rolled_back");
    assert_eq!(json["hosts"]["esx-02"]["outcome"]["kind"], "validation_mismatch");
    assert_eq!(
        json["hosts"]["esx-02"]["outcome"]["failed_service"],
        "CimBrokerService"
    );

    let text = report.to_text();
    assert!(text.contains("esx-02"));
    assert!(text.contains("1/2 hosts fully applied"));
}
