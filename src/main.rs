use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;

use power_trace_simulator::prelude::*;

use git_version::git_version;
const GIT_VERSION: &str = git_version!(fallback = "unknown");

/// Pretty print the totals of a finished dataset
fn print_summary(summary: &DatasetSummary) {
    println!(
        "\n{} traces with {} samples written",
        summary.traces_written.to_string().green(),
        summary.total_samples
    );
    if summary.is_clean() {
        return;
    }
    println!("{}", "Conditions reported during the runs:".yellow());
    let counts = [
        ("saturated samples", summary.saturated_samples),
        ("truncated traces", summary.truncated_runs),
        ("protocol violations", summary.protocol_violations),
        ("unknown markers", summary.unknown_markers),
    ];
    for (name, count) in counts.iter().filter(|(_, count)| *count != 0) {
        println!("  {name:<20}: {}", count.to_string().yellow());
    }
}

fn run(config: &Config) -> Result<DatasetSummary> {
    let target = emulated_target(config)?;
    let mut generator = DatasetGenerator::new(config, target)?;
    generator.run()
}

/// Program to generate labeled power traces of AES firmware running on an
/// emulated Cortex-M target
fn main() -> ExitCode {
    // Get parameter from command line
    let args = Args::parse();
    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return ExitCode::FAILURE;
        }
    };
    // Override with: RUST_LOG=debug
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    println!("--- Power trace simulator: {GIT_VERSION} ---\n");
    println!("Firmware      : {}", config.firmware.display());
    println!("Traces        : {}", config.trace_count);
    println!("Output        : {}\n", config.output_directory.display());

    match run(&config) {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            ExitCode::FAILURE
        }
    }
}
