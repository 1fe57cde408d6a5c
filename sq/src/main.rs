//! SmartQueue - learned-priority task scheduler
//!
//! CLI entry point for running simulated workloads and inspecting config.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use smartqueue::cli::{Cli, Command, OutputFormat};
use smartqueue::config::Config;
use smartqueue::simulate::{SimulationReport, run_simulation};

fn parse_level(level_str: Option<&str>) -> tracing::Level {
    match level_str.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = parse_level(cli_log_level.or(config_log_level));
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("smartqueue")
        .join("logs");

    let log_file = fs::create_dir_all(&log_dir).and_then(|_| fs::File::create(log_dir.join("smartqueue.log")));
    match log_file {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_ansi(false)
                .with_env_filter(filter)
                .init();
        }
        Err(e) => {
            eprintln!("Warning: cannot open log file in {} ({}), logging to stderr", log_dir.display(), e);
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Simulate {
            tasks,
            failure_rate,
            seed,
            format,
        } => {
            debug!(?tasks, ?failure_rate, ?seed, %format, "main: matched Simulate command");
            cmd_simulate(config, tasks, failure_rate, seed, format).await
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

async fn cmd_simulate(
    mut config: Config,
    tasks: Option<usize>,
    failure_rate: Option<f64>,
    seed: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    if let Some(tasks) = tasks {
        config.simulation.tasks = tasks;
    }
    if let Some(failure_rate) = failure_rate {
        config.simulation.failure_rate = failure_rate;
    }
    if seed.is_some() {
        config.simulation.seed = seed;
    }

    let report = run_simulation(config.scheduler, &config.simulation)
        .await
        .context("Simulation failed")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    println!("{}", "SmartQueue Simulation".bold());
    println!("---------------------");
    println!("Submitted:     {}", report.submitted);
    println!("Completed:     {}", report.metrics.completed.to_string().green());
    println!("Failed:        {}", report.metrics.failed.to_string().red());
    println!("Avg wait:      {:.2}ms", report.metrics.avg_wait_time_ms);
    println!("Final ceiling: {}", report.final_ceiling);
    println!("Value entries: {}", report.value_table_entries);
    println!("Elapsed:       {}ms", report.elapsed_ms);
    println!();
    println!("{}", "Tasks (admission order)".bold());

    for id in &report.admission_order {
        let Some(task) = report.tasks.iter().find(|t| &t.id == id) else {
            continue;
        };
        let status = if task.succeeded {
            "completed".green()
        } else {
            "failed".red()
        };
        println!("  {} urgency={:.2} {}", task.id, task.urgency, status);
    }
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
