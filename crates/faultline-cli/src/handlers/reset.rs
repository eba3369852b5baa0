//! Reset command handler

use super::{load_project_config, open_store, reporter};
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::ResetArgs;
use faultline::{Localizer, ResetSummary};

/// Execute the reset command
pub fn execute_reset(cli: &CliConfig, args: &ResetArgs) -> CliResult<ResetSummary> {
    let config = load_project_config(cli, &args.project)?;
    let store = open_store(&config)?;
    let summary = Localizer::new(config, &store).reset();

    let reporter = reporter(cli);
    for path in &summary.files_failed {
        reporter.warning(&format!("could not strip {}", path.display()));
    }
    for path in &summary.artifacts_failed {
        reporter.warning(&format!("could not delete {}", path.display()));
    }
    reporter.success(&format!(
        "{} files restored, {} mappings cleared, {} coverage files removed",
        summary.files_stripped, summary.mappings_cleared, summary.coverage_files_removed
    ));
    Ok(summary)
}
