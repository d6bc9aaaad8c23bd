//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Freezeframe: verify transient UI states by holding and faking API responses
#[derive(Parser, Debug)]
#[command(name = "freezeframe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the built-in scenarios
    List(ListArgs),

    /// Run scenarios against a live front-end
    Run(RunArgs),
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// YAML profile overriding paths and labels
    #[arg(long)]
    pub profile: Option<PathBuf>,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunArgs {
    /// Scenarios to run (all when omitted)
    pub scenarios: Vec<String>,

    /// Base URL of the application under test
    #[arg(long, env = "FREEZEFRAME_BASE_URL", default_value = "http://localhost:3000")]
    pub base_url: String,

    /// Directory for screenshots
    #[arg(short, long, env = "FREEZEFRAME_OUTPUT_DIR", default_value = "verification")]
    pub output_dir: PathBuf,

    /// Budget for every wait, assertion and navigation in milliseconds
    #[arg(long, env = "FREEZEFRAME_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Chromium executable
    #[arg(long, env = "CHROMIUM_PATH")]
    pub chromium_path: Option<String>,

    /// Disable the Chromium sandbox (containers)
    #[arg(long)]
    pub no_sandbox: bool,

    /// YAML profile overriding paths, labels and fixture delays
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Report format on stdout
    #[arg(long, value_enum, default_value = "text")]
    pub format: FormatArg,

    /// Also write the JSON report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Report format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatArg {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

impl From<FormatArg> for crate::output::OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}
