//! Faultline CLI Library
//!
//! Command-line front end for the faultline fault localizer: argument
//! parsing, terminal output and one handler per subcommand.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod handlers;
mod output;

pub use commands::{
    Cli, ColorArg, Commands, FormatArg, InstrumentArgs, ListArgs, RankArgs, ResetArgs, RunArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{summary_line, ProgressReporter};
