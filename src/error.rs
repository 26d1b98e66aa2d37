use std::fmt;

/// Errors raised by sandbox components for reasons unrelated to the
/// submitted code (storage, process management, configuration).
///
/// The execution service turns these into `ExecutionOutcome::InternalError`,
/// so callers only ever see a generic message; the detail goes to the logs.
#[derive(Debug)]
pub enum SandboxError {
    /// Artifact directory could not be created, written or listed
    Storage(String),
    /// The interpreter process could not be started
    Spawn(String),
    /// The running process could not be waited on or its pipes were missing
    Process(String),
    /// Invalid configuration (bad deny pattern, zero limits, ...)
    Config(String),
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::Storage(msg) => write!(f, "storage error: {msg}"),
            SandboxError::Spawn(msg) => write!(f, "spawn error: {msg}"),
            SandboxError::Process(msg) => write!(f, "process error: {msg}"),
            SandboxError::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for SandboxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category_and_detail() {
        let err = SandboxError::Spawn("python3: No such file or directory".into());
        assert_eq!(
            err.to_string(),
            "spawn error: python3: No such file or directory"
        );

        let err = SandboxError::Config("max_code_bytes must be > 0".into());
        assert!(err.to_string().starts_with("configuration error"));
    }

    #[test]
    fn test_converts_into_anyhow() {
        fn fails() -> anyhow::Result<()> {
            let result: Result<(), SandboxError> =
                Err(SandboxError::Storage("read-only filesystem".into()));
            result?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(err.to_string().contains("read-only filesystem"));
    }
}
