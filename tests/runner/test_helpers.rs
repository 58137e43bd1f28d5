//! Shared fixtures for runner BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;
use welder::keys::{KEYS_DIR, PRIVATE_KEY_FILE};
use welder::test_support::{FakeKeysmith, FakeProvider, FakeShell};
use welder::{ResourceConfig, RunReport, TestRunner, Welder};

pub type ScriptedRunner = TestRunner<FakeProvider, FakeShell, FakeKeysmith>;

#[derive(Clone, Debug)]
pub struct RunnerContext {
    pub provider: FakeProvider,
    pub shell: FakeShell,
    pub keysmith: FakeKeysmith,
    pub config: ResourceConfig,
    pub key_base: Utf8PathBuf,
    pub outcome: Option<RunOutcome>,
    pub(crate) key_tmp: Arc<TempDir>,
}

#[derive(Clone, Debug)]
pub enum RunOutcome {
    Report(RunReport),
    Failure(String),
}

#[derive(Clone, Debug, Error)]
pub enum RunnerTestError {
    #[error("failed to prepare key directory: {0}")]
    Workspace(String),
    #[error("configuration rejected: {0}")]
    Config(String),
}

impl RunnerContext {
    /// Builds a runner over clones of the doubles, so assertions observe
    /// every call the runner makes.
    pub fn runner(&self) -> Result<ScriptedRunner, RunnerTestError> {
        let validated = self
            .config
            .clone()
            .validate_for_run()
            .map_err(|err| RunnerTestError::Config(err.to_string()))?;
        let welder = Welder::new(
            validated,
            self.provider.clone(),
            self.shell.clone(),
            self.keysmith.clone(),
        )
        .with_poll_interval(Duration::from_millis(1));
        Ok(TestRunner::new(welder))
    }
}

#[fixture]
pub fn runner_context_result() -> Result<RunnerContext, RunnerTestError> {
    build_runner_context()
}

#[fixture]
pub fn runner_context(
    runner_context_result: Result<RunnerContext, RunnerTestError>,
) -> RunnerContext {
    runner_context_result
        .unwrap_or_else(|err| panic!("runner context fixture should initialise: {err}"))
}

pub fn build_runner_context() -> Result<RunnerContext, RunnerTestError> {
    let key_tmp = TempDir::new().map_err(|err| RunnerTestError::Workspace(err.to_string()))?;
    let key_base = Utf8PathBuf::from_path_buf(key_tmp.path().to_path_buf()).map_err(|path| {
        RunnerTestError::Workspace(format!("non-utf8 tempdir path: {}", path.display()))
    })?;
    let keys = key_base.join(KEYS_DIR);
    std::fs::create_dir_all(&keys).map_err(|err| RunnerTestError::Workspace(err.to_string()))?;
    std::fs::write(keys.join(PRIVATE_KEY_FILE), "key")
        .map_err(|err| RunnerTestError::Workspace(err.to_string()))?;

    Ok(RunnerContext {
        provider: FakeProvider::new(),
        shell: FakeShell::new(),
        keysmith: FakeKeysmith::new(),
        config: ResourceConfig::default(),
        key_base,
        outcome: None,
        key_tmp: Arc::new(key_tmp),
    })
}
