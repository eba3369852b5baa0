//! Faultline CLI entry point

use clap::Parser;
use faultline_cli::{handlers, Cli, CliConfig, CliResult, ColorChoice, Commands, Verbosity};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(config.verbosity);

    match &cli.command {
        Commands::Run(args) => handlers::execute_run(&config, args).map(|_| ()),
        Commands::Instrument(args) => handlers::execute_instrument(&config, args).map(|_| ()),
        Commands::Reset(args) => handlers::execute_reset(&config, args).map(|_| ()),
        Commands::Rank(args) => handlers::execute_rank(&config, args).map(|_| ()),
        Commands::List(args) => handlers::execute_list(&config, args).map(|_| ()),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let color: ColorChoice = cli.color.clone().into();
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(color)
        .with_config_file(cli.config.clone())
}

/// `RUST_LOG` wins over the verbosity flags
fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
