//! Workflow execution
//!
//! The dispatcher hands every resolved invocation to a [`WorkflowEngine`]. [`ShellEngine`] runs
//! the blueprint's workflows as shell scripts from the environment's resources directory.

use std::path::PathBuf;
use std::process::Command as ProcessCommand;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;

use crate::commands::task::TaskConfig;
use crate::environment::blueprint::WorkflowSpec;
use crate::environment::{Environment, search_path};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Workflow '{0}' is not defined in the blueprint")]
    WorkflowNotFound(String),
    #[error("Workflow '{workflow}' failed after {attempts} attempt(s) ({})", exit_status(.code.as_ref()))]
    WorkflowFailed {
        workflow: String,
        attempts: u64,
        code: Option<i32>,
    },
    #[error("Unable to start workflow '{workflow}' in {}: {source}", .dir.display())]
    Io {
        workflow: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid search path: {0}")]
    Path(#[from] std::env::JoinPathsError),
    #[error("Unable to serialize workflow parameters: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn exit_status(code: Option<&i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// A fully resolved workflow invocation
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub workflow: &'a str,
    pub parameters: &'a Value,
    pub task: TaskConfig,
}

pub trait WorkflowEngine {
    /// Run `request.workflow` in `environment`, blocking until it finishes.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the workflow is unknown or does not succeed.
    fn execute(
        &self,
        environment: &Environment,
        request: &ExecutionRequest<'_>,
    ) -> Result<(), EngineError>;
}

impl<E: WorkflowEngine + ?Sized> WorkflowEngine for &E {
    fn execute(
        &self,
        environment: &Environment,
        request: &ExecutionRequest<'_>,
    ) -> Result<(), EngineError> {
        (**self).execute(environment, request)
    }
}

/// Runs workflows with `sh -c`, inheriting stdio
#[derive(Debug, Clone, Default)]
pub struct ShellEngine;

impl ShellEngine {
    fn build(
        environment: &Environment,
        request: &ExecutionRequest<'_>,
        workflow: &WorkflowSpec,
    ) -> Result<ProcessCommand, EngineError> {
        let mut command = ProcessCommand::new("sh");
        command
            .arg("-c")
            .arg(workflow.script())
            .current_dir(environment.resources_dir())
            .env("CLASH_WORKFLOW", request.workflow)
            .env("CLASH_PARAMETERS", serde_json::to_string(request.parameters)?)
            .env("CLASH_INPUTS", serde_json::to_string(&environment.inputs)?)
            .env("CLASH_ENVIRONMENT", &environment.name)
            .env("CLASH_TASK_RETRIES", request.task.retries.to_string())
            .env(
                "CLASH_TASK_RETRY_INTERVAL",
                request.task.retry_interval.to_string(),
            )
            .env(
                "CLASH_TASK_THREAD_POOL_SIZE",
                request.task.thread_pool_size.to_string(),
            )
            .env("PATH", search_path::joined_with(std::env::var_os("PATH"))?);
        if let Some(env) = workflow.env() {
            command.envs(env);
        }
        Ok(command)
    }
}

impl WorkflowEngine for ShellEngine {
    fn execute(
        &self,
        environment: &Environment,
        request: &ExecutionRequest<'_>,
    ) -> Result<(), EngineError> {
        let workflow = environment
            .blueprint
            .workflows
            .get(request.workflow)
            .ok_or_else(|| EngineError::WorkflowNotFound(request.workflow.to_string()))?;
        debug!("Starting '{}' workflow execution", request.workflow);

        let attempts = u64::try_from(request.task.retries).unwrap_or(0) + 1;
        let interval = Duration::from_secs(u64::try_from(request.task.retry_interval).unwrap_or(0));
        let mut code = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                warn!(
                    "Workflow '{}' failed ({}), retrying in {}s (attempt {attempt}/{attempts})",
                    request.workflow,
                    exit_status(code.as_ref()),
                    interval.as_secs()
                );
                std::thread::sleep(interval);
            }
            let status = Self::build(environment, request, workflow)?
                .status()
                .map_err(|source| EngineError::Io {
                    workflow: request.workflow.to_string(),
                    dir: environment.resources_dir(),
                    source,
                })?;
            if status.success() {
                debug!("Workflow '{}' finished", request.workflow);
                return Ok(());
            }
            code = status.code();
        }
        Err(EngineError::WorkflowFailed {
            workflow: request.workflow.to_string(),
            attempts,
            code,
        })
    }
}
