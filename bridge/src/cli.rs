//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// modbridge - in-process bridge for dynamically loaded modules
#[derive(Parser)]
#[command(
    name = "modbridge",
    about = "Service registry, message bus and reactive store for loosely coupled modules",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Config is read from --config, ./.modbridge.yml, or ~/.config/modbridge/modbridge.yml"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long, global = true, help = "Log level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Load the sample modules and show how they find each other
    Demo {
        /// Load consumers before providers
        #[arg(long)]
        reverse: bool,

        /// Print runtime metrics as JSON at the end
        #[arg(long)]
        metrics: bool,
    },

    /// Print the effective configuration as YAML
    Config,
}
