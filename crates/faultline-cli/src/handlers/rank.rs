//! Rank command handler

use super::{load_project_config, open_store, reporter};
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::RankArgs;
use faultline::{Localizer, RunSummary};

/// Execute the rank command against the artifacts of an earlier run
pub fn execute_rank(cli: &CliConfig, args: &RankArgs) -> CliResult<RunSummary> {
    let mut config = load_project_config(cli, &args.project)?;
    if let Some(format) = args.format {
        config.report_format = format.into();
    }
    if let Some(top) = args.top {
        if top == 0 {
            return Err(CliError::invalid_argument("--top must be at least 1"));
        }
        config.top = Some(top);
    }
    if let Some(output) = &args.output {
        config.report_path = Some(output.clone());
    }
    let store = open_store(&config)?;
    let mut reporter = reporter(cli);
    let summary = Localizer::new(config, &store).rank_existing(&mut reporter)?;

    reporter.suspects(&summary.top_suspects);
    if let Some(path) = &summary.report_path {
        reporter.info(&format!("Report written to {}", path.display()));
    }
    Ok(summary)
}
