//! JSON envelope written to stdout and the exit code for each error family.

use berth::error::Hint;
use berth::{Error, ErrorCode, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize response".to_string())))
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: (!err.hints.is_empty()).then(|| err.hints.clone()),
                retryable: err.retryable,
            }),
        }
    }
}

fn print_response<T: Serialize>(response: &CliResponse<T>) -> Result<()> {
    use std::io::{self, Write};

    let payload = response.to_json()?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(Error::internal_io(e.to_string(), Some("write stdout".to_string())));
    }
    Ok(())
}

pub fn map_cmd_result_to_json<T: Serialize>(
    result: Result<(T, i32)>,
) -> (Result<serde_json::Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (
                Err(Error::internal_json(
                    err.to_string(),
                    Some("serialize response".to_string()),
                )),
                1,
            ),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(err.code);
            (Err(err), exit_code)
        }
    }
}

fn exit_code_for_error(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::ConfigMissingKey
        | ErrorCode::ConfigInvalidJson
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ValidationInvalidArgument => 2,

        ErrorCode::ProjectNotFound | ErrorCode::ServerNotFound | ErrorCode::ServiceNotFound => 4,

        ErrorCode::DescriptorInvalid
        | ErrorCode::DeployPreconditionFailed
        | ErrorCode::DeployStageFailed
        | ErrorCode::DeployCanaryUnhealthy
        | ErrorCode::DeployHealthCheckFailed => 10,

        ErrorCode::SshIdentityFileNotFound
        | ErrorCode::RemoteCommandFailed
        | ErrorCode::RemoteCommandTimeout => 20,

        ErrorCode::LockTimeout => 30,

        ErrorCode::InternalIoError | ErrorCode::InternalJsonError | ErrorCode::InternalUnexpected => 1,
    }
}

pub fn print_json_result(result: Result<serde_json::Value>) {
    let printed = match result {
        Ok(data) => print_response(&CliResponse::success(data)),
        Err(err) => print_response(&CliResponse::<()>::from_error(&err)),
    };
    if let Err(err) = printed {
        eprintln!("{}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_their_family_exit_code() {
        let (_, code) = map_cmd_result_to_json::<()>(Err(Error::lock_timeout(
            "web1:/srv/app",
            std::time::Duration::from_secs(600),
        )));
        assert_eq!(code, 30);

        let (_, code) = map_cmd_result_to_json::<()>(Err(Error::no_previous_version("api", 1)));
        assert_eq!(code, 10);

        let (_, code) = map_cmd_result_to_json::<()>(Err(Error::project_not_found("nope", vec![])));
        assert_eq!(code, 4);
    }

    #[test]
    fn error_envelope_omits_empty_hints() {
        let response = CliResponse::<()>::from_error(&Error::internal_unexpected("boom"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "internal.unexpected");
        assert!(value["error"].get("hints").is_none());
        assert!(value.get("data").is_none());
    }
}
