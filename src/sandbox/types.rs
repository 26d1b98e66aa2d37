use std::time::Duration;

/// Languages the sandbox knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
}

impl Language {
    /// Parses the language name sent by the caller. Matching is exact.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "python" => Some(Language::Python),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
        }
    }

    /// File extension used for the artifact
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
        }
    }
}

/// One submission, as received from the caller.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    /// Declared language name, validated by the execution service
    pub language: String,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
        }
    }
}

/// Process-wide resource ceilings, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraints {
    pub max_code_bytes: usize,
    pub wall_clock_timeout: Duration,
    /// Cap applied to stdout and stderr independently
    pub max_output_bytes: usize,
    pub artifact_retention: Duration,
}

/// Result of one `execute` call. Exactly one case applies.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The process exited on its own. `exit_code` is `None` when it was
    /// killed by a signal.
    Completed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        limit: Duration,
    },
    /// A stream went over the cap; output captured so far is kept.
    OutputExceeded {
        limit: usize,
        stdout: String,
        stderr: String,
    },
    RejectedByGate(String),
    Invalid(String),
    InternalError(String),
}

/// Who is at fault when an execution does not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Bad shape, unsupported language or oversize code
    Validation,
    /// Denied by the static gate
    PolicyViolation,
    /// Timeout or output cap
    ResourceExceeded,
    /// Nonzero exit or death by signal
    RuntimeFailure,
    /// Storage or spawn failure unrelated to the code
    Internal,
}

impl ExecutionOutcome {
    /// True only for a natural exit with status zero.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Completed {
                exit_code: Some(0),
                ..
            }
        )
    }

    /// Failure class, or `None` on success.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            ExecutionOutcome::Completed { exit_code, .. } => match exit_code {
                Some(0) => None,
                _ => Some(FailureClass::RuntimeFailure),
            },
            ExecutionOutcome::TimedOut { .. } | ExecutionOutcome::OutputExceeded { .. } => {
                Some(FailureClass::ResourceExceeded)
            }
            ExecutionOutcome::RejectedByGate(_) => Some(FailureClass::PolicyViolation),
            ExecutionOutcome::Invalid(_) => Some(FailureClass::Validation),
            ExecutionOutcome::InternalError(_) => Some(FailureClass::Internal),
        }
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed { .. } => "completed",
            ExecutionOutcome::TimedOut { .. } => "timed_out",
            ExecutionOutcome::OutputExceeded { .. } => "output_exceeded",
            ExecutionOutcome::RejectedByGate(_) => "rejected_by_gate",
            ExecutionOutcome::Invalid(_) => "invalid",
            ExecutionOutcome::InternalError(_) => "internal_error",
        }
    }
}
