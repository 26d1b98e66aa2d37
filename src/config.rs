use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;

use crate::sandbox::Constraints;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Directory holding one temporary source file per execution
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Interpreter binary, resolved through `search_path`
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Arguments placed before the artifact path
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    /// The only PATH the child process sees
    #[serde(default = "default_search_path")]
    pub search_path: String,
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
    /// Wall-clock limit for one run, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Per-stream output cap, in bytes
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Age after which the reaper deletes a leftover artifact
    #[serde(default = "default_artifact_retention_secs")]
    pub artifact_retention_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GateConfig {
    /// Extra deny rules, checked after the built-in ones
    #[serde(default)]
    pub extra_deny_patterns: Vec<DenyPatternConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DenyPatternConfig {
    /// Regular expression matched against the raw source text
    pub pattern: String,
    /// Construct class reported back to the caller
    pub reason: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("sandbox_temp")
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-u".to_string()]
}

fn default_search_path() -> String {
    "/usr/local/bin:/usr/bin:/bin".to_string()
}

fn default_max_code_bytes() -> usize {
    64 * 1024
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_output_bytes() -> usize {
    512 * 1024
}

fn default_artifact_retention_secs() -> u64 {
    3_600
}

fn default_reaper_interval_secs() -> u64 {
    3_600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            interpreter: default_interpreter(),
            interpreter_args: default_interpreter_args(),
            search_path: default_search_path(),
            max_code_bytes: default_max_code_bytes(),
            timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            artifact_retention_secs: default_artifact_retention_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl ServerConfig {
    /// Socket address string for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl SandboxConfig {
    /// Fixed resource ceilings derived from this section.
    pub fn constraints(&self) -> Constraints {
        Constraints {
            max_code_bytes: self.max_code_bytes,
            wall_clock_timeout: Duration::from_millis(self.timeout_ms),
            max_output_bytes: self.max_output_bytes,
            artifact_retention: Duration::from_secs(self.artifact_retention_secs),
        }
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${SANDBOX_DIR}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects limits that would make every execution fail.
    pub fn validate(&self) -> Result<()> {
        let sandbox = &self.sandbox;
        if sandbox.max_code_bytes == 0 {
            return Err(anyhow!("sandbox.max_code_bytes must be greater than 0"));
        }
        if sandbox.timeout_ms == 0 {
            return Err(anyhow!("sandbox.timeout_ms must be greater than 0"));
        }
        if sandbox.max_output_bytes == 0 {
            return Err(anyhow!("sandbox.max_output_bytes must be greater than 0"));
        }
        if sandbox.reaper_interval_secs == 0 {
            return Err(anyhow!("sandbox.reaper_interval_secs must be greater than 0"));
        }
        if sandbox.interpreter.trim().is_empty() {
            return Err(anyhow!("sandbox.interpreter must not be empty"));
        }

        // In-flight artifacts are protected from the reaper, but a short
        // retention still hints at a misconfiguration.
        let constraints = sandbox.constraints();
        if constraints.artifact_retention <= constraints.wall_clock_timeout {
            warn!(
                "artifact_retention ({}s) is not larger than the execution timeout ({}ms)",
                sandbox.artifact_retention_secs, sandbox.timeout_ms
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:5000");
        assert_eq!(config.sandbox.interpreter, "python3");
        assert_eq!(config.sandbox.interpreter_args, vec!["-u"]);
        assert_eq!(config.sandbox.max_code_bytes, 65_536);
        assert_eq!(config.sandbox.max_output_bytes, 524_288);
        assert!(config.gate.extra_deny_patterns.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_constraints_from_config() {
        let config: Config = toml::from_str(
            r#"
            [sandbox]
            timeout_ms = 1500
            max_output_bytes = 1024
            artifact_retention_secs = 60
            "#,
        )
        .unwrap();
        let constraints = config.sandbox.constraints();
        assert_eq!(constraints.wall_clock_timeout, Duration::from_millis(1500));
        assert_eq!(constraints.max_output_bytes, 1024);
        assert_eq!(constraints.artifact_retention, Duration::from_secs(60));
        assert_eq!(constraints.max_code_bytes, 65_536);
    }

    #[test]
    fn test_extra_deny_patterns_parse() {
        let config: Config = toml::from_str(
            r#"
            [[gate.extra_deny_patterns]]
            pattern = 'import\s+socket'
            reason = "network module import"
            "#,
        )
        .unwrap();
        assert_eq!(config.gate.extra_deny_patterns.len(), 1);
        assert_eq!(
            config.gate.extra_deny_patterns[0].reason,
            "network module import"
        );
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.sandbox.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sandbox.max_output_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sandbox.max_code_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_interpreter() {
        let mut config = Config::default();
        config.sandbox.interpreter = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_expands_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.toml");
        std::env::set_var("CODE_SANDBOX_TEST_DIR", "/var/tmp/snippets");
        std::fs::write(
            &path,
            "[sandbox]\nartifact_dir = \"${CODE_SANDBOX_TEST_DIR}\"\n",
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(
            config.sandbox.artifact_dir,
            PathBuf::from("/var/tmp/snippets")
        );
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(Config::load("/nonexistent/sandbox.toml").is_err());
    }
}
