//! HTTP surface: `POST /api/execute-code` and `GET /health`.
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::sandbox::{ExecutionOutcome, ExecutionRequest, FailureClass, Sandbox};

/// Request body. Fields are optional so a missing field gets our own
/// 400 message rather than the extractor's.
#[derive(Debug, Deserialize)]
pub struct ExecuteCodeRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// 200 body. `output` and `error` serialize as `null` when absent.
#[derive(Debug, Serialize, PartialEq)]
pub struct ExecuteCodeResponse {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

pub fn router(sandbox: Arc<Sandbox>) -> Router {
    Router::new()
        .route("/api/execute-code", post(execute_code))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(sandbox)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn execute_code(
    State(sandbox): State<Arc<Sandbox>>,
    payload: Result<Json<ExecuteCodeRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            debug!("Malformed request: {rejection}");
            return message(StatusCode::BAD_REQUEST, "Malformed request body");
        }
    };

    let (code, language) = match (body.code, body.language) {
        (Some(code), Some(language)) if !code.is_empty() && !language.is_empty() => {
            (code, language)
        }
        _ => return message(StatusCode::BAD_REQUEST, "Code and language are required"),
    };

    let outcome = sandbox.execute(ExecutionRequest::new(code, language)).await;
    outcome_response(outcome)
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

/// Maps an outcome onto the wire contract.
///
/// Caller faults (validation, policy) are 400s and internal errors a
/// generic 500. Anything that actually ran is a 200 whose `success`
/// field carries the verdict.
fn outcome_response(outcome: ExecutionOutcome) -> Response {
    match outcome.failure_class() {
        Some(FailureClass::Validation) | Some(FailureClass::PolicyViolation) => {
            let text = match outcome {
                ExecutionOutcome::RejectedByGate(reason) => {
                    format!("Code contains potentially dangerous operations: {reason}")
                }
                ExecutionOutcome::Invalid(reason) => reason,
                _ => "Invalid request".to_string(),
            };
            return message(StatusCode::BAD_REQUEST, &text);
        }
        // Detail was logged by the execution service
        Some(FailureClass::Internal) => {
            return message(StatusCode::INTERNAL_SERVER_ERROR, "Failed to execute code");
        }
        _ => {}
    }

    let body = match outcome {
        ExecutionOutcome::Completed {
            exit_code: Some(0),
            stdout,
            ..
        } => ExecuteCodeResponse {
            success: true,
            output: Some(stdout),
            error: None,
        },
        ExecutionOutcome::Completed {
            exit_code, stderr, ..
        } => {
            let error = if !stderr.is_empty() {
                stderr
            } else {
                match exit_code {
                    Some(code) => format!("Process exited with code {code}"),
                    None => "Process was terminated by a signal".to_string(),
                }
            };
            ExecuteCodeResponse {
                success: false,
                output: None,
                error: Some(error),
            }
        }
        ExecutionOutcome::TimedOut { limit } => ExecuteCodeResponse {
            success: false,
            output: None,
            error: Some(format!(
                "Execution timed out after {}ms",
                limit.as_millis()
            )),
        },
        ExecutionOutcome::OutputExceeded { limit, stdout, .. } => ExecuteCodeResponse {
            success: false,
            output: (!stdout.is_empty()).then_some(stdout),
            error: Some(format!(
                "Output exceeded maximum buffer size ({limit} bytes)"
            )),
        },
        // Handled above
        ExecutionOutcome::RejectedByGate(_)
        | ExecutionOutcome::Invalid(_)
        | ExecutionOutcome::InternalError(_) => ExecuteCodeResponse {
            success: false,
            output: None,
            error: Some("Failed to execute code".to_string()),
        },
    };
    (StatusCode::OK, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::Path;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app(dir: &Path) -> (Arc<Sandbox>, Router) {
        let mut config = Config::default();
        config.sandbox.artifact_dir = dir.join("artifacts");
        config.sandbox.interpreter = "sh".to_string();
        config.sandbox.interpreter_args = vec![];
        config.sandbox.search_path = "/usr/bin:/bin".to_string();
        config.sandbox.timeout_ms = 500;
        config.sandbox.max_output_bytes = 256;
        config.sandbox.max_code_bytes = 1024;
        let sandbox = Arc::new(Sandbox::start(&config).await.unwrap());
        (sandbox.clone(), router(sandbox))
    }

    async fn post_raw(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/execute-code")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post(app: Router, code: &str, language: &str) -> (StatusCode, serde_json::Value) {
        let body = json!({ "code": code, "language": language }).to_string();
        post_raw(app, &body).await
    }

    #[tokio::test]
    async fn test_success_response() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post(app, "echo hello", "python").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "success": true, "output": "hello\n", "error": null })
        );
    }

    #[tokio::test]
    async fn test_empty_stdout_is_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post(app, "true", "python").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "output": "", "error": null }));
    }

    #[tokio::test]
    async fn test_runtime_failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post(app, "echo bad >&2; exit 2", "python").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "success": false, "output": null, "error": "bad\n" })
        );
    }

    #[tokio::test]
    async fn test_silent_failure_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (_, body) = post(app, "exit 4", "python").await;
        assert_eq!(body["error"], "Process exited with code 4");
    }

    #[tokio::test]
    async fn test_timeout_is_200_with_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post(app, "sleep 10", "python").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["output"], serde_json::Value::Null);
        assert!(body["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_overflow_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post(app, "while :; do echo xxxxxxxx; done", "python").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["output"].as_str().unwrap().len(), 256);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Output exceeded maximum buffer size"));
    }

    #[tokio::test]
    async fn test_policy_rejection_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post(app, "eval('2 + 2')", "python").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["message"],
            "Code contains potentially dangerous operations: dynamic evaluation"
        );
        assert!(std::fs::read_dir(dir.path().join("artifacts"))
            .unwrap()
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn test_unsupported_language_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post(app, "puts 1", "ruby").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Only Python is supported at the moment");
    }

    #[tokio::test]
    async fn test_oversize_code_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post(app, &"#".repeat(1025), "python").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Code exceeds maximum size limit");
    }

    #[tokio::test]
    async fn test_missing_fields_are_400() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post_raw(app.clone(), r#"{"code": "print(1)"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Code and language are required");

        let (status, _) = post(app, "", "python").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let (_sandbox, app) = app(dir.path()).await;

        let (status, body) = post_raw(app, "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Malformed request body");
    }

    #[tokio::test]
    async fn test_internal_error_is_generic_500() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sandbox.artifact_dir = dir.path().join("artifacts");
        config.sandbox.interpreter = "missing-interpreter-binary".to_string();
        let sandbox = Arc::new(Sandbox::start(&config).await.unwrap());

        let (status, body) = post(router(sandbox), "print(1)", "python").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "message": "Failed to execute code" }));
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (sandbox, app) = app(dir.path()).await;

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::timeout(Duration::from_secs(5), sandbox.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_python_end_to_end() {
        let config_defaults = Config::default();
        let available = std::process::Command::new("python3")
            .arg("--version")
            .env_clear()
            .env("PATH", &config_defaults.sandbox.search_path)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !available {
            eprintln!("python3 not installed, skipping");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sandbox.artifact_dir = dir.path().join("artifacts");
        let sandbox = Arc::new(Sandbox::start(&config).await.unwrap());

        let (status, body) = post(
            router(sandbox),
            "total = sum(i * i for i in range(4))\nprint(total)",
            "python",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "output": "14\n", "error": null }));
    }
}
