//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use faultline::ReportFormat;
use std::path::PathBuf;

/// Faultline: spectrum-based fault localization for Rust crates
#[derive(Parser, Debug)]
#[command(name = "faultline")]
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

    /// Configuration file (default: <project>/faultline.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Instrument, run every test in isolation and rank statements
    Run(RunArgs),

    /// Insert probes without running tests
    Instrument(InstrumentArgs),

    /// Strip probes and delete coverage artifacts
    Reset(ResetArgs),

    /// Rank again from the coverage of a previous run
    Rank(RankArgs),

    /// List the tests a run would execute
    List(ListArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Package directory (contains Cargo.toml)
    #[arg(default_value = ".")]
    pub project: PathBuf,

    /// Strip old probes and artifacts first
    #[arg(long)]
    pub reset: bool,

    /// Report format
    #[arg(long)]
    pub format: Option<FormatArg>,

    /// Keep only the N most suspicious statements
    #[arg(long)]
    pub top: Option<usize>,

    /// Per-test timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Only run tests whose id contains PATTERN (repeatable)
    #[arg(short, long = "filter", value_name = "PATTERN")]
    pub filters: Vec<String>,

    /// Report path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write the run summary as JSON
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Instrument #[cfg(test)] modules too
    #[arg(long)]
    pub include_test_modules: bool,

    /// Add the probe crate at this path to the target's dependencies
    #[arg(long)]
    pub probe_crate: Option<PathBuf>,
}

/// Arguments for the instrument command
#[derive(Parser, Debug)]
pub struct InstrumentArgs {
    /// Package directory (contains Cargo.toml)
    #[arg(default_value = ".")]
    pub project: PathBuf,

    /// Only this function (`Type::method` or `module::function`)
    #[arg(long, requires = "file")]
    pub method: Option<String>,

    /// File containing --method
    #[arg(long, requires = "method")]
    pub file: Option<PathBuf>,

    /// Instrument #[cfg(test)] modules too
    #[arg(long)]
    pub include_test_modules: bool,
}

/// Arguments for the reset command
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Package directory (contains Cargo.toml)
    #[arg(default_value = ".")]
    pub project: PathBuf,
}

/// Arguments for the rank command
#[derive(Parser, Debug)]
pub struct RankArgs {
    /// Package directory (contains Cargo.toml)
    #[arg(default_value = ".")]
    pub project: PathBuf,

    /// Report format
    #[arg(long)]
    pub format: Option<FormatArg>,

    /// Keep only the N most suspicious statements
    #[arg(long)]
    pub top: Option<usize>,

    /// Report path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Package directory (contains Cargo.toml)
    #[arg(default_value = ".")]
    pub project: PathBuf,

    /// Only tests whose id contains PATTERN (repeatable)
    #[arg(short, long = "filter", value_name = "PATTERN")]
    pub filters: Vec<String>,
}

/// Report format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatArg {
    /// Comma-separated values
    #[default]
    Csv,
    /// Markdown table
    Markdown,
}

impl From<FormatArg> for ReportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => Self::Csv,
            FormatArg::Markdown => Self::Markdown,
        }
    }
}

/// Color argument
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
