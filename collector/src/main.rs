use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use collector::models::CollectionResult;
use common::config::Settings;
use serde_json::json;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

fn cli() -> Command {
    Command::new("Storage Telemetry Collector")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Collects storage array telemetry from live systems or replayed JSON dumps")
        .subcommand(
            Command::new("replay")
                .about("Replay a directory of previously collected JSON files")
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Sets a custom config file"),
                )
                .arg(
                    Arg::new("directory")
                        .short('d')
                        .long("directory")
                        .value_name("DIR")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory holding the JSON files to replay"),
                )
                .arg(
                    Arg::new("system-id")
                        .short('s')
                        .long("system-id")
                        .value_name("SYSTEM_ID")
                        .help("WWN of the system to replay; required for multi-system archives"),
                )
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECS")
                        .value_parser(value_parser!(u64))
                        .help("Base collection interval: 60, 120, 180 or 300"),
                )
                .arg(
                    Arg::new("max-iterations")
                        .short('n')
                        .long("max-iterations")
                        .value_name("MAX")
                        .value_parser(value_parser!(u64))
                        .help("Stop after this many cycles"),
                )
                .arg(
                    Arg::new("dump")
                        .long("dump")
                        .action(ArgAction::SetTrue)
                        .help("Print every collection result as JSON on stdout"),
                ),
        )
}

fn init_logging(settings: &Settings) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout is reserved for --dump output
    match settings.logging.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        "compact" => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }
}

fn load_settings(matches: &ArgMatches) -> anyhow::Result<Settings> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("config/collector.toml");

    let mut settings = Settings::new(config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path))?;

    if let Some(directory) = matches.get_one::<PathBuf>("directory") {
        settings.replay.directory = Some(directory.clone());
    }
    if let Some(system_id) = matches.get_one::<String>("system-id") {
        settings.replay.system_id = Some(system_id.clone());
    }
    if let Some(interval) = matches.get_one::<u64>("interval") {
        settings.collector.base_interval_secs = *interval;
    }
    if let Some(max) = matches.get_one::<u64>("max-iterations") {
        settings.collector.max_iterations = Some(*max);
    }
    Ok(settings)
}

fn dump_cycle(iteration: u64, results: &[CollectionResult]) {
    let cycle = json!({ "iteration": iteration, "results": results });
    match serde_json::to_string(&cycle) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::error!(iteration, error = %e, "Failed to serialize results"),
    }
}

fn run_replay(matches: &ArgMatches) -> anyhow::Result<()> {
    let settings = load_settings(matches)?;
    init_logging(&settings);

    let dump = matches.get_flag("dump");
    let summary = collector::run_replay_pipeline(&settings, |iteration, results| {
        if dump {
            dump_cycle(iteration, results);
        }
    })
    .map_err(|e| {
        if e.is_fatal() {
            anyhow!(e).context("Replay cannot start; fix the configuration and retry")
        } else {
            anyhow!(e).context("Replay failed")
        }
    })?;

    eprintln!(
        "Replayed {} cycle(s), {} record(s), {} incomplete result(s)",
        summary.cycles, summary.records, summary.failed_results
    );
    Ok(())
}

fn main() {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("replay", replay_matches)) => {
            if let Err(e) = run_replay(replay_matches) {
                eprintln!("Error: {:#}", e);
                process::exit(1);
            }
        }
        _ => {
            eprintln!("No subcommand specified. Use --help for usage information.");
            process::exit(1);
        }
    }
}
