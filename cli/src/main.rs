//! Quantum Control Engine CLI

use clap::Parser;
use quantum_control_engine::{config::Settings, logging, runner, EngineError, LogLevel};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quandary")]
#[command(version, about = "Quantum optimal control of coupled oscillators")]
struct Cli {
    /// Path to the configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write a JSON run summary to this file
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => LogLevel::Trace,
        "debug" => LogLevel::Debug,
        "info" => LogLevel::Info,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    };
    logging::set_log_level(log_level);

    if let Err(err) = run(&cli) {
        eprintln!("{}", err);
        std::process::exit(err.exit_code());
    }
}

fn run(cli: &Cli) -> Result<(), EngineError> {
    let settings = Settings::from_file(&cli.config)?;
    let summary = runner::run(&settings)?;

    println!(
        "{}: objective {:1.8e}, fidelity {:1.6}",
        summary.runtype, summary.objective, summary.fidelity
    );
    if let Some(status) = &summary.status {
        println!("optimizer status: {:?} after {} iterations", status, summary.iterations);
    }

    if let Some(path) = &cli.summary {
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| EngineError::Internal(format!("summary serialization: {}", e)))?;
        std::fs::write(path, json)?;
    }
    Ok(())
}
