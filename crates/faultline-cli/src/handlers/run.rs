//! Run command handler

use super::{load_project_config, open_store, reporter};
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::RunArgs;
use faultline::{CargoTestExecutor, FaultlineConfig, Localizer, RunSummary};
use std::fs;
use std::path::Path;

/// Layer command-line flags over the project configuration
pub fn apply_run_overrides(
    mut config: FaultlineConfig,
    args: &RunArgs,
) -> CliResult<FaultlineConfig> {
    if let Some(format) = args.format {
        config.report_format = format.into();
    }
    if let Some(top) = args.top {
        if top == 0 {
            return Err(CliError::invalid_argument("--top must be at least 1"));
        }
        config.top = Some(top);
    }
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            return Err(CliError::invalid_argument("--timeout must be at least 1"));
        }
        config.timeout_secs = timeout;
    }
    if !args.filters.is_empty() {
        config.test_filters.clone_from(&args.filters);
    }
    if let Some(output) = &args.output {
        config.report_path = Some(output.clone());
    }
    if let Some(probe_crate) = &args.probe_crate {
        config.probe_crate_path = Some(probe_crate.clone());
    }
    config.reset_before_run |= args.reset;
    config.include_test_modules |= args.include_test_modules;
    Ok(config)
}

/// Execute the run command
pub fn execute_run(cli: &CliConfig, args: &RunArgs) -> CliResult<RunSummary> {
    let config = apply_run_overrides(load_project_config(cli, &args.project)?, args)?;
    let store = open_store(&config)?;
    let executor = CargoTestExecutor::new(config.manifest_path(), config.timeout())
        .with_extra_args(config.cargo_args.clone());
    let mut reporter = reporter(cli);

    let localizer = Localizer::new(config, &store);
    let result = localizer.run(&executor, &mut reporter);
    reporter.finish();
    let summary = result?;
    store.close()?;

    reporter.summary(
        summary.tests_passed,
        summary.tests_failed,
        summary.tests_timed_out,
        summary.duration,
    );
    if !summary.has_failures() {
        reporter.warning("No test failed; rankings carry no signal");
    }
    reporter.suspects(&summary.top_suspects);
    if let Some(path) = &summary.report_path {
        reporter.info(&format!("Report written to {}", path.display()));
    }
    if let Some(json) = &args.json {
        write_summary_json(json, &summary)?;
        reporter.info(&format!("Summary written to {}", json.display()));
    }
    Ok(summary)
}

/// Write the run summary as pretty JSON
pub fn write_summary_json(path: &Path, summary: &RunSummary) -> CliResult<()> {
    let text = serde_json::to_string_pretty(summary)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    Ok(())
}
