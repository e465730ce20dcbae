use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use secproto_core::test_harness::{run_simulation, FleetSpec, SimulatedFleet};
use secproto_core::{ReconfigConfig, Transition};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn cli() -> Command {
    Command::new("secproto")
        .version(secproto_core::VERSION)
        .about("Enable or disable the legacy SSLv3 protocol across a host fleet")
        .subcommand_required(true)
        .subcommand(
            Command::new("simulate")
                .about("Run the orchestrator against a simulated fleet")
                .arg(
                    Arg::new("fleet")
                        .long("fleet")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML file describing the simulated hosts"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML run configuration"),
                )
                .arg(
                    Arg::new("enable-legacy")
                        .long("enable-legacy")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("disable-legacy")
                        .help("Accept the legacy protocol next to the modern ones"),
                )
                .arg(
                    Arg::new("disable-legacy")
                        .long("disable-legacy")
                        .action(ArgAction::SetTrue)
                        .help("Accept only the modern protocols"),
                )
                .arg(
                    Arg::new("skip-version-check")
                        .long("skip-version-check")
                        .action(ArgAction::SetTrue)
                        .help("Admit hosts whose version is not supported"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
}

fn run_config(args: &ArgMatches) -> anyhow::Result<ReconfigConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => ReconfigConfig::from_file(path)
            .with_context(|| format!("loading run configuration {}", path.display()))?,
        None => ReconfigConfig::default(),
    };
    if args.get_flag("enable-legacy") {
        config.transition = Transition::EnableLegacy;
    } else if args.get_flag("disable-legacy") {
        config.transition = Transition::DisableLegacy;
    }
    if args.get_flag("skip-version-check") {
        config.bypass_version_check = true;
    }
    Ok(config)
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let fleet_path = args
        .get_one::<PathBuf>("fleet")
        .context("--fleet is required")?;
    let spec = FleetSpec::from_file(fleet_path)
        .with_context(|| format!("loading fleet {}", fleet_path.display()))?;
    let config = run_config(args)?;

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current host");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let fleet = SimulatedFleet::new(spec);
    let report = run_simulation(&fleet, config, stop).await;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.to_text());
    }
    Ok(report.all_applied())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let all_applied = simulate(args).await?;
            std::process::exit(if all_applied { 0 } else { 1 });
        }
        _ => Ok(()),
    }
}
