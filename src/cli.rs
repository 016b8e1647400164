use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Scheduler - personal schedule manager backend with an LLM assistant
#[derive(Debug, Parser)]
#[command(name = "scheduler")]
#[command(about = "Personal schedule manager backend", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Command to execute (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the REST API server
    Serve,

    /// Run one reminder pass and print the report
    SendReminders,

    /// View or initialise configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigActions {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
