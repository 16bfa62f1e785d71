//! Authenticated RPC transport
//!
//! Runs one adapter command through a `ContainerTransport` and classifies
//! the result: a failing process becomes `RpcFailed` (or `Unauthorized`),
//! empty stdout `EmptyResponse`, unparseable stdout `BadResponse`.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::module::ipc::protocol::{encode_request, AdapterCommand};
use crate::module::traits::{ContainerTransport, ExecOutput, ModuleError};
use crate::utils::timeout::with_deadline;

/// Executes adapter commands in a named container
#[derive(Clone)]
pub struct RpcTransport {
    transport: Arc<dyn ContainerTransport>,
    timeout: Duration,
}

impl RpcTransport {
    pub fn new(transport: Arc<dyn ContainerTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn inner(&self) -> &Arc<dyn ContainerTransport> {
        &self.transport
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `command` in `container`, writing `request` to stdin if given,
    /// and return raw stdout once the process succeeded
    pub async fn exec(
        &self,
        container: &str,
        command: AdapterCommand,
        request: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ModuleError> {
        let stdin = request.map(encode_request).transpose()?;
        let argv = command.command_line();
        debug!("Adapter RPC {} -> {}", command, container);

        let label = format!("adapter {} on {}", command, container);
        let output = with_deadline(
            self.transport.exec(container, &argv, stdin, cancel),
            Some(self.timeout),
            cancel,
            &label,
        )
        .await?;
        check_output(command, output)
    }

    /// Run `command` and decode its JSON response
    pub async fn call<T: DeserializeOwned>(
        &self,
        container: &str,
        command: AdapterCommand,
        request: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<T, ModuleError> {
        let stdout = self.exec(container, command, request, cancel).await?;
        decode_response(command, &stdout)
    }

    /// Run `command` for its side effect; any stdout is ignored
    pub async fn call_unit(
        &self,
        container: &str,
        command: AdapterCommand,
        request: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<(), ModuleError> {
        self.exec(container, command, request, cancel).await.map(|_| ())
    }
}

/// Classify a finished exec session
pub fn check_output(command: AdapterCommand, output: ExecOutput) -> Result<Vec<u8>, ModuleError> {
    let stderr = output.stderr.trim();
    if output.exit_code != 0 || !stderr.is_empty() {
        if stderr.to_ascii_lowercase().contains("unauthorized") {
            return Err(ModuleError::Unauthorized(format!("{}: {}", command, stderr)));
        }
        return Err(ModuleError::RpcFailed {
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: stderr.to_string(),
        });
    }
    Ok(output.stdout)
}

/// Decode a JSON response body
pub fn decode_response<T: DeserializeOwned>(
    command: AdapterCommand,
    stdout: &[u8],
) -> Result<T, ModuleError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Err(ModuleError::EmptyResponse(command.to_string()));
    }
    serde_json::from_slice(stdout).map_err(|e| ModuleError::BadResponse {
        command: command.to_string(),
        reason: e.to_string(),
    })
}
