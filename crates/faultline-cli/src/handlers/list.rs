//! List command handler

use super::load_project_config;
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::ListArgs;
use faultline::{Localizer, ProbeMappingStore, TestCase, TestTarget};

/// `id  (target)` line for one test
#[must_use]
pub fn format_test_line(test: &TestCase) -> String {
    match &test.target {
        TestTarget::Unit => format!("{}  (unit)", test.id()),
        TestTarget::Integration(bin) => format!("{}  (integration: {bin})", test.id()),
    }
}

/// Execute the list command, printing one test per line on stdout
pub fn execute_list(cli: &CliConfig, args: &ListArgs) -> CliResult<Vec<TestCase>> {
    let mut config = load_project_config(cli, &args.project)?;
    if !args.filters.is_empty() {
        config.test_filters.clone_from(&args.filters);
    }
    // listing never writes probes
    let store = ProbeMappingStore::in_memory();
    let tests = Localizer::new(config, &store).discover_tests();
    for test in &tests {
        println!("{}", format_test_line(test));
    }
    if !cli.verbosity.is_quiet() {
        eprintln!("{} tests", tests.len());
    }
    Ok(tests)
}
