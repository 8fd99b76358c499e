//! modbridge - demo host for the Bridge runtime

use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::task::LocalSet;
use tracing::info;

use modbridge::cli::{Cli, Command};
use modbridge::config::Config;
use modbridge::demo::run_demo;

fn setup_logging(cli_level: Option<&str>, config_path: Option<&PathBuf>) -> Result<()> {
    // Priority: CLI flag > config file > INFO
    let level = cli_level
        .map(str::to_string)
        .or_else(|| Config::load_log_level(config_path))
        .unwrap_or_else(|| "info".to_string());
    let level: tracing::Level = level
        .parse()
        .map_err(|_| eyre::eyre!("Invalid log level: {}", level))?;

    // Logs go to stderr so command output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

async fn cmd_demo(config: Config, reverse: bool, show_metrics: bool) -> Result<()> {
    let local = LocalSet::new();
    let outcome = local.run_until(run_demo(config.bridge, reverse)).await?;

    println!("{}", "Transcript".bold());
    for line in &outcome.transcript {
        let (who, rest) = line.split_once(": ").unwrap_or(("", line));
        println!("  {} {}", format!("{:>6}", who).cyan(), rest);
    }

    println!();
    println!("{}", "Unload reports".bold());
    for report in &outcome.reports {
        let status = if report.is_clean() {
            "clean".green()
        } else {
            format!("reclaimed {}", report.reclaimed).yellow()
        };
        println!(
            "  {:>6} issued {}, disposed {}, {}",
            report.module_id, report.issued, report.disposed_by_module, status
        );
        if let Some(error) = &report.stop_error {
            println!("         {}", error.red());
        }
    }

    if show_metrics {
        println!();
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome.metrics).context("Failed to serialize metrics")?
        );
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level.as_deref(), cli.config.as_ref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Some(Command::Demo { reverse, metrics }) => cmd_demo(config, reverse, metrics).await,
        Some(Command::Config) => cmd_config(&config),
        None => cmd_demo(config, false, false).await,
    }
}
