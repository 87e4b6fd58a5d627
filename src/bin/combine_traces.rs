use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

use power_trace_simulator::prelude::*;

/// Command line parameter structure
#[derive(Parser, Debug)]
#[command(author, version, about = "Combine simulated power traces into one JSON tracefile.", long_about = None)]
struct Args {
    /// Known correct key in hex. Embedded into the tracefile for validation
    #[arg(short = 'k', long = "correct-key", value_name = "hex")]
    correct_key: Option<String>,

    /// Cipher mode of the traced firmware
    #[arg(short, long, value_enum, default_value_t = CipherMode::Aes128Encrypt)]
    mode: CipherMode,

    /// Increase verbosity, can be given multiple times
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory the simulator wrote its tracefiles into
    input_directory: PathBuf,

    /// Output JSON file
    output_json: PathBuf,
}

fn run(args: &Args) -> Result<usize> {
    let key = args
        .correct_key
        .as_deref()
        .map(parse_hex_key)
        .transpose()?;
    let tracefile = Tracefile::combine(&args.input_directory, args.mode, key)?;
    tracefile.write(&args.output_json)?;
    Ok(tracefile.traces.len())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&args) {
        Ok(count) => {
            println!(
                "{} traces combined into {}",
                count.to_string().green(),
                args.output_json.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            ExitCode::FAILURE
        }
    }
}
