//! Constrained execution of untrusted code snippets.
//!
//! The pipeline for one request is:
//!
//! 1. Validate language and size
//! 2. Static deny-pattern gate
//! 3. Write the source to a uniquely named artifact
//! 4. Run the interpreter under wall-clock and output ceilings
//! 5. Delete the artifact, whatever happened in 4
//!
//! A reaper task deletes artifacts that escaped step 5 (crash, restart)
//! once they are older than the retention period.
//!
//! None of this is a security boundary. The gate is a textual filter and
//! the child runs with the service's own privileges; real containment
//! needs OS-level isolation around the interpreter.

pub mod artifact;
pub mod gate;
pub mod reaper;
pub mod runner;
pub mod service;
pub mod types;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::config::Config;
use crate::error::SandboxError;
use artifact::ArtifactStore;
use gate::StaticGate;
use reaper::Reaper;
use runner::{ProcessRunner, Runner};
use service::ExecutionService;

pub use types::{Constraints, ExecutionOutcome, ExecutionRequest, FailureClass};

/// The running execution subsystem.
///
/// Owns the execution service and the reaper task. Executions run as
/// tracked tasks: a caller that stops waiting does not abort its run, and
/// [`Sandbox::shutdown`] waits for every run to finish its cleanup.
pub struct Sandbox {
    service: Arc<ExecutionService>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Sandbox {
    /// Builds all components from config and starts the reaper.
    pub async fn start(config: &Config) -> Result<Self, SandboxError> {
        let runner = Arc::new(ProcessRunner::from_config(&config.sandbox));
        Self::start_with_runner(config, runner).await
    }

    pub async fn start_with_runner(
        config: &Config,
        runner: Arc<dyn Runner>,
    ) -> Result<Self, SandboxError> {
        let constraints = config.sandbox.constraints();
        let gate = StaticGate::with_extra(&config.gate.extra_deny_patterns)?;
        let store = ArtifactStore::open(&config.sandbox.artifact_dir).await?;

        info!(
            "Sandbox ready: {} ({} deny rules, timeout {}ms, output cap {} bytes)",
            store.dir().display(),
            gate.rule_count(),
            constraints.wall_clock_timeout.as_millis(),
            constraints.max_output_bytes
        );

        let reaper = Reaper::new(
            store.clone(),
            constraints.artifact_retention,
            config.sandbox.reaper_interval(),
        );
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(reaper.run(shutdown.clone()));

        Ok(Self {
            service: Arc::new(ExecutionService::new(constraints, gate, store, runner)),
            tracker,
            shutdown,
        })
    }

    /// Runs one request on a tracked task and waits for its outcome.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        if self.shutdown.is_cancelled() {
            return ExecutionOutcome::InternalError("sandbox is shutting down".to_string());
        }

        let service = self.service.clone();
        let handle = self
            .tracker
            .spawn(async move { service.execute(request).await });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Execution task failed: {e}");
                ExecutionOutcome::InternalError(format!("execution task failed: {e}"))
            }
        }
    }

    /// Stops the reaper and waits for in-flight executions to finish.
    pub async fn shutdown(&self) {
        info!(
            "Sandbox shutting down ({} executions in flight)",
            self.service.store().in_flight().len()
        );
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Sandbox stopped");
    }
}
