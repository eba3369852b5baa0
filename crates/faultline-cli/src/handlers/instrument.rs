//! Instrument command handler

use super::{load_project_config, open_store, reporter};
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::InstrumentArgs;
use faultline::{
    FaultlineError, InstrumentAction, InstrumentOptions, InstrumentStats, Instrumenter, Localizer,
    RunObserver,
};
use std::path::{Path, PathBuf};

/// A `--file` argument, tried relative to the project first
#[must_use]
pub fn resolve_source(project: &Path, file: &Path) -> PathBuf {
    let in_project = project.join(file);
    if file.is_relative() && in_project.is_file() {
        in_project
    } else {
        file.to_path_buf()
    }
}

/// Execute the instrument command.
///
/// A `--method` that matches nothing is reported as a warning and leaves the
/// file untouched.
pub fn execute_instrument(cli: &CliConfig, args: &InstrumentArgs) -> CliResult<InstrumentStats> {
    let mut config = load_project_config(cli, &args.project)?;
    config.include_test_modules |= args.include_test_modules;
    let store = open_store(&config)?;
    let mut reporter = reporter(cli);
    let localizer = Localizer::new(config, &store);

    let stats = match (&args.method, &args.file) {
        (Some(method), Some(file)) => {
            let path = resolve_source(&args.project, file);
            localizer.session().prepare()?;
            let target = localizer.session().probe_target();
            let instrumenter = Instrumenter::new(&store).with_options(InstrumentOptions {
                include_test_modules: localizer.config().include_test_modules,
            });
            let mut stats = InstrumentStats::default();
            match instrumenter.instrument_method_in_file(&path, method, Some(&target)) {
                Ok(done) => {
                    match done.action {
                        InstrumentAction::Injected => stats.files_instrumented += 1,
                        InstrumentAction::Retargeted => stats.files_retargeted += 1,
                        InstrumentAction::Unchanged => {}
                    }
                    stats.probes_created = done.probes.len();
                    reporter.on_file_instrumented(&done);
                }
                Err(e @ FaultlineError::MethodNotFound { .. }) => reporter.warning(&e.to_string()),
                Err(e) => return Err(e.into()),
            }
            stats
        }
        _ => localizer.instrument_sources(&mut reporter)?,
    };
    store.close()?;

    reporter.success(&format!(
        "{} files instrumented, {} retargeted, {} failed, {} probes",
        stats.files_instrumented, stats.files_retargeted, stats.files_failed, stats.probes_created
    ));
    Ok(stats)
}
