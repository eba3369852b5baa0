//! Command handlers - extracted from main.rs for testability
//!
//! Each handler module contains:
//! - The execution logic for a CLI command
//! - Pure helper functions
//! - Tests against a generated project

pub mod instrument;
pub mod list;
pub mod rank;
pub mod reset;
pub mod run;

pub use instrument::execute_instrument;
pub use list::{execute_list, format_test_line};
pub use rank::execute_rank;
pub use reset::execute_reset;
pub use run::{apply_run_overrides, execute_run};

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::ProgressReporter;
use faultline::{FaultlineConfig, ProbeMappingStore};
use std::path::Path;

/// Project configuration: `--config` when given, else `<project>/faultline.yaml`,
/// else defaults. The project directory always comes from the command line.
pub fn load_project_config(cli: &CliConfig, project: &Path) -> CliResult<FaultlineConfig> {
    if !project.is_dir() {
        return Err(CliError::invalid_argument(format!(
            "{} is not a directory",
            project.display()
        )));
    }
    let mut config = match &cli.config_file {
        Some(path) => FaultlineConfig::load(path)?,
        None => FaultlineConfig::discover(project)?,
    };
    config.project_dir = project.to_path_buf();
    Ok(config)
}

/// Mapping store of a project
pub fn open_store(config: &FaultlineConfig) -> CliResult<ProbeMappingStore> {
    Ok(ProbeMappingStore::open(config.mapping_path())?)
}

/// Reporter honoring the CLI's verbosity and color choice
#[must_use]
pub fn reporter(cli: &CliConfig) -> ProgressReporter {
    ProgressReporter::new(cli.color.should_color(), cli.verbosity.is_quiet())
        .with_verbose(cli.verbosity.is_verbose())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    pub const LIB: &str = "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\n#[cfg(test)]\nmod tests {\n    #[test]\n    fn adds() {\n        assert_eq!(super::add(1, 2), 3);\n    }\n}\n";

    pub fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Cargo.toml", "[package]\nname = \"calc\"\nversion = \"0.1.0\"\n");
        write(dir.path(), "src/lib.rs", LIB);
        dir
    }

    pub fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }
}
