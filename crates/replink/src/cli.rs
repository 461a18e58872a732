//! Clap derive structures for the `replink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// replink -- talk to a Repetier-Server from the command line
#[derive(Debug, Parser)]
#[command(
    name = "replink",
    version,
    about = "Query and drive Repetier-Server printers from the command line",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "REPLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Server host (overrides profile)
    #[arg(long, short = 'H', env = "REPLINK_HOST", global = true)]
    pub host: Option<String>,

    /// Server port (overrides profile)
    #[arg(long, env = "REPLINK_PORT", global = true)]
    pub port: Option<u16>,

    /// API key
    #[arg(long, env = "REPLINK_API_KEY", global = true, hide_env = true)]
    pub api_key: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "json", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Seconds to wait for the first successful login
    #[arg(long, env = "REPLINK_TIMEOUT", default_value = "10", global = true)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List printers known to the server
    #[command(alias = "ls")]
    Printers,

    /// Print push events as they arrive (Ctrl-C to stop)
    Watch(WatchArgs),

    /// Send a G-code line to a printer
    Send(SendArgs),

    /// Issue a raw action and print its response
    Call(CallArgs),

    /// Upload a model file to a printer
    Upload(UploadArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Event names to print (default: all common events)
    pub events: Vec<String>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Printer slug
    pub printer: String,

    /// G-code line, e.g. "G28"
    pub gcode: String,
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Action name, e.g. "listPrinter"
    pub action: String,

    /// Printer slug the action is scoped to
    #[arg(long)]
    pub printer: Option<String>,

    /// JSON object sent as the action's data
    #[arg(long)]
    pub data: Option<String>,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Printer slug
    pub printer: String,

    /// Path to the model file
    pub file: PathBuf,

    /// Model name (default: file stem)
    #[arg(long)]
    pub name: Option<String>,

    /// Model group
    #[arg(long, default_value = "")]
    pub group: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Show the effective configuration (secrets masked)
    Show,
}
