//! Test execution stage: one command per test through the execution manager.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::{
    CommandOutput, CommandSpec, ExecError, ExecuteStage, ExecutionManager, ExitKind, StageError,
    StageResult, Staged,
};
use crate::domain::{
    ExecutionResult, ImpactedTestSet, Payload, RunContext, TasConfig, TestId, TestStatus,
};

use super::fatal;

pub struct TestRunner {
    executor: Arc<ExecutionManager>,
}

impl TestRunner {
    pub fn new(executor: Arc<ExecutionManager>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ExecuteStage for TestRunner {
    async fn execute(
        &self,
        ctx: &RunContext,
        _payload: &Payload,
        tas: &TasConfig,
        tests: ImpactedTestSet,
    ) -> StageResult<Vec<ExecutionResult>> {
        if tests.is_empty() {
            info!("No tests to run");
            return Ok(Staged::ok(Vec::new()));
        }

        // Secrets that cannot be loaded or resolved fail the whole stage
        self.executor.resolve_env(&tas.env).await.map_err(fatal)?;

        let ids = tests.into_vec();
        let specs = ids
            .iter()
            .map(|id| {
                CommandSpec::new(id.as_str(), tas.command_for(id), &ctx.config.repo_dir)
                    .with_env(tas.env.clone())
            })
            .collect();

        info!(tests = ids.len(), "Running tests");
        let outputs = self.executor.run_all(specs, &ctx.cancel).await;

        if ctx.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let results: Vec<ExecutionResult> = ids
            .into_iter()
            .zip(outputs)
            .map(|(id, output)| to_result(id, output))
            .collect();

        let failed = results
            .iter()
            .filter(|r| r.status != TestStatus::Passed)
            .count();
        info!(tests = results.len(), failed, "Tests finished");

        Ok(Staged::ok(results))
    }
}

fn to_result(id: TestId, output: Result<CommandOutput, ExecError>) -> ExecutionResult {
    let output = match output {
        Ok(output) => output,
        Err(e) => return ExecutionResult::new(id, TestStatus::Errored, 0).with_error(e.to_string()),
    };

    let duration_ms = output.duration.as_millis() as u64;
    let result = match output.exit {
        ExitKind::Exited(0) => ExecutionResult::new(id, TestStatus::Passed, duration_ms),
        ExitKind::Exited(code) => ExecutionResult::new(id, TestStatus::Failed, duration_ms)
            .with_error(format!("exit code {}", code)),
        ExitKind::TimedOut => {
            ExecutionResult::new(id, TestStatus::Errored, duration_ms).with_error("timed out")
        }
        ExitKind::Cancelled => ExecutionResult::new(id, TestStatus::Skipped, duration_ms),
    };

    match output.log_path {
        Some(path) => result.with_output(path),
        None => result,
    }
}
