use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    ProjectNotFound,
    ServerNotFound,
    ServiceNotFound,

    SshIdentityFileNotFound,

    RemoteCommandFailed,
    RemoteCommandTimeout,

    LockTimeout,

    DescriptorInvalid,

    DeployPreconditionFailed,
    DeployStageFailed,
    DeployCanaryUnhealthy,
    DeployHealthCheckFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::ProjectNotFound => "project.not_found",
            ErrorCode::ServerNotFound => "server.not_found",
            ErrorCode::ServiceNotFound => "service.not_found",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",
            ErrorCode::RemoteCommandTimeout => "remote.command_timeout",

            ErrorCode::LockTimeout => "lock.timeout",

            ErrorCode::DescriptorInvalid => "descriptor.invalid",

            ErrorCode::DeployPreconditionFailed => "deploy.precondition_failed",
            ErrorCode::DeployStageFailed => "deploy.stage_failed",
            ErrorCode::DeployCanaryUnhealthy => "deploy.canary_unhealthy",
            ErrorCode::DeployHealthCheckFailed => "deploy.health_check_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailedDetails {
    pub stage: String,
    pub service: String,
    pub cause_code: String,
    pub cause: String,
    pub cause_details: Value,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        let problem = problem.into();
        let details = serde_json::to_value(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    pub fn project_not_found(id: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::not_found(ErrorCode::ProjectNotFound, "Project not found", id, suggestions)
            .with_hint("Project files live in ~/.config/berth/projects/<id>.json")
    }

    pub fn server_not_found(id: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::not_found(ErrorCode::ServerNotFound, "Server not found", id, suggestions)
            .with_hint("Server files live in ~/.config/berth/servers/<id>.json")
    }

    pub fn service_not_found(id: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::not_found(
            ErrorCode::ServiceNotFound,
            "Service not found in project",
            id,
            suggestions,
        )
    }

    fn not_found(
        code: ErrorCode,
        message: &str,
        id: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        let id = id.into();
        let details = serde_json::to_value(NotFoundDetails {
            id: id.clone(),
            suggestions,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(code, format!("{}: {}", message, id), details)
    }

    pub fn ssh_identity_file_not_found(
        server_id: impl Into<String>,
        identity_file: impl Into<String>,
    ) -> Self {
        let details = serde_json::json!({
            "serverId": server_id.into(),
            "identityFile": identity_file.into(),
        });

        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            "SSH identity file not found",
            details,
        )
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let reason = first_line(if details.stderr.trim().is_empty() {
            &details.stdout
        } else {
            &details.stderr
        })
        .unwrap_or("no output")
        .to_string();
        let message = format!(
            "Remote command failed (exit {}): {}",
            details.exit_code, reason
        );
        let details =
            serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::RemoteCommandFailed, message, details)
    }

    pub fn remote_command_timeout(command: impl Into<String>, timeout: Duration) -> Self {
        let details = serde_json::json!({
            "command": command.into(),
            "timeoutSecs": timeout.as_secs_f64(),
        });

        let mut err = Self::new(
            ErrorCode::RemoteCommandTimeout,
            format!("Remote command exceeded its {:?} deadline", timeout),
            details,
        );
        err.retryable = Some(true);
        err
    }

    pub fn lock_timeout(identity: impl Into<String>, elapsed: Duration) -> Self {
        let identity = identity.into();
        let details = serde_json::json!({
            "identity": identity,
            "elapsedMs": elapsed.as_millis() as u64,
        });

        let mut err = Self::new(
            ErrorCode::LockTimeout,
            format!(
                "Timed out after {:.1}s waiting for the deploy lock on '{}'",
                elapsed.as_secs_f64(),
                identity
            ),
            details,
        )
        .with_hint("Another deploy is running against this stack; retry once it finishes");
        err.retryable = Some(true);
        err
    }

    pub fn descriptor_invalid(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            ErrorCode::DescriptorInvalid,
            format!("Stack descriptor failed validation: {}", reason),
            serde_json::json!({ "reason": reason }),
        )
    }

    pub fn precondition_failed(service: impl Into<String>, problem: impl Into<String>) -> Self {
        let service = service.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::DeployPreconditionFailed,
            format!("Cannot proceed with '{}': {}", service, problem),
            serde_json::json!({ "service": service, "problem": problem }),
        )
    }

    pub fn no_previous_version(service: impl Into<String>, current: u32) -> Self {
        Self::precondition_failed(
            service,
            format!("no previous version to roll back to (current version is {})", current),
        )
    }

    pub fn prebuilt_rollback(service: impl Into<String>) -> Self {
        Self::precondition_failed(
            service,
            "service uses a pre-built image and has no version history",
        )
        .with_hint("Change the image reference in the project file and deploy again")
    }

    /// Wrap an underlying failure with the pipeline stage that produced it.
    pub fn stage_failed(stage: &str, service: impl Into<String>, cause: Error) -> Self {
        let service = service.into();
        let message = format!("{} stage failed for '{}': {}", stage, service, cause.message);
        let details = serde_json::to_value(StageFailedDetails {
            stage: stage.to_string(),
            service,
            cause_code: cause.code.as_str().to_string(),
            cause: cause.message,
            cause_details: cause.details,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        let mut err = Self::new(ErrorCode::DeployStageFailed, message, details);
        err.hints = cause.hints;
        err.retryable = cause.retryable;
        err
    }

    pub fn canary_unhealthy(
        service: impl Into<String>,
        version: u32,
        reason: impl Into<String>,
    ) -> Self {
        let service = service.into();
        let reason = reason.into();
        Self::new(
            ErrorCode::DeployCanaryUnhealthy,
            format!(
                "Canary health check failed for '{}' at version {}: {}",
                service, version, reason
            ),
            serde_json::json!({
                "service": service,
                "version": version,
                "reason": reason,
                "previousVersionServing": true,
            }),
        )
        .with_hint("The previous version is still serving traffic")
    }

    pub fn health_check_failed(
        service: impl Into<String>,
        container: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let service = service.into();
        let container = container.into();
        let reason = reason.into();
        let hint = format!("Inspect the container with: docker logs {}", container);
        Self::new(
            ErrorCode::DeployHealthCheckFailed,
            format!("'{}' did not become healthy: {}", service, reason),
            serde_json::json!({
                "service": service,
                "container": container,
                "reason": reason,
            }),
        )
        .with_hint(hint)
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let details = serde_json::json!({ "key": key.into(), "path": path });
        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            details,
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        let details = serde_json::json!({ "path": path.into(), "error": err.to_string() });
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = serde_json::to_value(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.clone(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value: {}", problem),
            details,
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let details = serde_json::json!({ "error": error, "context": context });
        Self::new(ErrorCode::InternalIoError, format!("IO error: {}", error), details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::json!({ "error": error.into(), "context": context });
        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalUnexpected,
            format!("Unexpected error: {}", error),
            serde_json::json!({ "error": error }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

/// First non-empty trimmed line of a command's output.
pub(crate) fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}
