use std::sync::Arc;

use tracing::{debug, error, info, warn, Instrument};

use super::artifact::ArtifactStore;
use super::gate::{StaticGate, Verdict};
use super::runner::Runner;
use super::types::{Constraints, ExecutionOutcome, ExecutionRequest, Language};

/// Per-request orchestration: validate, gate, store, run, clean up.
pub struct ExecutionService {
    constraints: Constraints,
    gate: StaticGate,
    store: ArtifactStore,
    runner: Arc<dyn Runner>,
}

impl ExecutionService {
    pub fn new(
        constraints: Constraints,
        gate: StaticGate,
        store: ArtifactStore,
        runner: Arc<dyn Runner>,
    ) -> Self {
        Self {
            constraints,
            gate,
            store,
            runner,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Runs one submission to an outcome.
    ///
    /// Validation and gate failures return before the filesystem is
    /// touched. Once an artifact exists it is deleted whatever the runner
    /// reports, before the outcome is returned.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("execution", %id);
        async move {
            let outcome = self.execute_inner(&request).await;
            match &outcome {
                ExecutionOutcome::InternalError(reason) => error!("Execution failed: {reason}"),
                other => info!(
                    "Execution finished: {} (success: {})",
                    other.label(),
                    other.is_success()
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute_inner(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let language = match Language::parse(&request.language) {
            Some(language) => language,
            None => {
                debug!("Unsupported language {:?}", request.language);
                return ExecutionOutcome::Invalid(
                    "Only Python is supported at the moment".to_string(),
                );
            }
        };

        if request.code.len() > self.constraints.max_code_bytes {
            debug!(
                "Code is {} bytes (max {})",
                request.code.len(),
                self.constraints.max_code_bytes
            );
            return ExecutionOutcome::Invalid("Code exceeds maximum size limit".to_string());
        }

        if let Verdict::Denied(reason) = self.gate.evaluate(&request.code) {
            warn!("Rejected by gate: {reason}");
            return ExecutionOutcome::RejectedByGate(reason);
        }

        let artifact = match self.store.create(&request.code, language).await {
            Ok(artifact) => artifact,
            Err(e) => return ExecutionOutcome::InternalError(e.to_string()),
        };
        debug!("Running {} artifact {}", language.name(), artifact.token());

        let result = self.runner.run(&artifact, &self.constraints).await;

        // Cleanup runs on every path out of the runner
        self.store.delete(artifact).await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::InternalError(e.to_string()),
        }
    }
}
