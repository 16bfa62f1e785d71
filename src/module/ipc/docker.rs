//! Docker container transport
//!
//! `ContainerTransport` over the Docker Engine API. Exec output is fully
//! drained before the exit code is inspected so a process blocked on a full
//! pipe cannot deadlock the call.

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions, LogOutput};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use crate::module::traits::{
    ContainerInfo, ContainerState, ContainerTransport, ExecOutput, InteractiveIo, ModuleError,
};

const CONNECT_TIMEOUT_SECS: u64 = 120;
/// How long a cancelled interactive session waits for its input to close
const INPUT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Copy the caller's stdin into an exec session until EOF or `stop`
///
/// The exec input is always shut down on return so the process inside the
/// container sees end of input.
async fn forward_stdin<R, W>(mut stdin: R, mut input: W, stop: CancellationToken)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = [0u8; 8192];
    loop {
        let read = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            read = stdin.read(&mut buffer) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        if input.write_all(&buffer[..read]).await.is_err() {
            break;
        }
    }
    let _ = input.shutdown().await;
}

/// Docker Engine transport
#[derive(Clone)]
pub struct DockerTransport {
    docker: Docker,
}

impl DockerTransport {
    /// Connect to `socket`, or to the local defaults when `None`
    pub fn connect(socket: Option<&str>) -> Result<Self, ModuleError> {
        let docker = match socket {
            Some(path) => {
                Docker::connect_with_socket(path, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self { docker })
    }

    async fn create_exec(&self, container: &str, command: &[String], tty: bool) -> Result<String, ModuleError> {
        let options = CreateExecOptions {
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(tty),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(|e| classify(container, e))?;
        Ok(exec.id)
    }

    async fn exit_code(&self, container: &str, exec_id: &str) -> Result<i64, ModuleError> {
        let inspect = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| classify(container, e))?;
        Ok(inspect.exit_code.unwrap_or(-1))
    }
}

/// Missing or stopped containers are `ContainerGone`
fn classify(container: &str, error: DockerError) -> ModuleError {
    match error {
        DockerError::DockerResponseServerError {
            status_code: 404 | 409,
            message,
        } => ModuleError::ContainerGone(format!("{}: {}", container, message)),
        other => ModuleError::from(other),
    }
}

fn state_from(status: Option<&str>) -> ContainerState {
    match status {
        Some("running") => ContainerState::Running,
        _ => ContainerState::Stopped,
    }
}

#[async_trait]
impl ContainerTransport for DockerTransport {
    async fn exec(
        &self,
        container: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ModuleError> {
        let exec_id = self.create_exec(container, command, false).await?;

        let session = async {
            let mut result = ExecOutput::default();
            match self
                .docker
                .start_exec(&exec_id, None)
                .await
                .map_err(|e| classify(container, e))?
            {
                StartExecResults::Attached { mut output, mut input } => {
                    if let Some(bytes) = stdin {
                        input
                            .write_all(&bytes)
                            .await
                            .map_err(|e| ModuleError::io(container, "Failed to write request to", e))?;
                    }
                    input
                        .shutdown()
                        .await
                        .map_err(|e| ModuleError::io(container, "Failed to close stdin of", e))?;

                    let mut stderr = Vec::new();
                    while let Some(chunk) = output.next().await {
                        match chunk.map_err(|e| classify(container, e))? {
                            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                                result.stdout.extend_from_slice(&message)
                            }
                            LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                            LogOutput::StdIn { .. } => {}
                        }
                    }
                    result.stderr = String::from_utf8_lossy(&stderr).into_owned();
                }
                StartExecResults::Detached => {
                    warn!("Exec session in {} started detached", container);
                }
            }
            result.exit_code = self.exit_code(container, &exec_id).await?;
            Ok::<_, ModuleError>(result)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Exec in {} cancelled", container);
                Err(ModuleError::Cancelled)
            }
            result = session => result,
        }
    }

    async fn exec_interactive(
        &self,
        container: &str,
        command: &[String],
        preamble: Vec<u8>,
        io: InteractiveIo,
        cancel: &CancellationToken,
    ) -> Result<i64, ModuleError> {
        let exec_id = self.create_exec(container, command, false).await?;
        let InteractiveIo {
            stdin,
            mut stdout,
            mut stderr,
        } = io;

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModuleError::Cancelled),
            started = self.docker.start_exec(&exec_id, None) => {
                started.map_err(|e| classify(container, e))?
            }
        };

        match started {
            StartExecResults::Attached { mut output, mut input } => {
                input
                    .write_all(&preamble)
                    .await
                    .map_err(|e| ModuleError::io(container, "Failed to write request to", e))?;

                let stop = cancel.child_token();
                let forwarder =
                    AbortOnDropHandle::new(tokio::spawn(forward_stdin(stdin, input, stop.clone())));

                let pump = async {
                    while let Some(chunk) = output.next().await {
                        let written = match chunk.map_err(|e| classify(container, e))? {
                            LogOutput::StdOut { message } | LogOutput::Console { message } => {
                                stdout.write_all(&message).await
                            }
                            LogOutput::StdErr { message } => stderr.write_all(&message).await,
                            LogOutput::StdIn { .. } => Ok(()),
                        };
                        written.map_err(|e| {
                            ModuleError::io(container, "Failed to forward output of", e)
                        })?;
                    }
                    Ok::<(), ModuleError>(())
                };
                let cancelled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => true,
                    result = pump => {
                        result?;
                        false
                    }
                };

                stop.cancel();
                if cancelled {
                    debug!("Interactive exec in {} cancelled, closing its input", container);
                    let _ = tokio::time::timeout(INPUT_CLOSE_GRACE, forwarder).await;
                    return Err(ModuleError::Cancelled);
                }
                drop(forwarder);
                let _ = stdout.flush().await;
                let _ = stderr.flush().await;
            }
            StartExecResults::Detached => {
                warn!("Interactive exec session in {} started detached", container);
            }
        }
        self.exit_code(container, &exec_id).await
    }

    async fn inspect(&self, container: &str) -> Result<Option<ContainerInfo>, ModuleError> {
        match self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => {
                let running = response
                    .state
                    .as_ref()
                    .and_then(|state| state.running)
                    .unwrap_or(false);
                Ok(Some(ContainerInfo {
                    id: response.id.unwrap_or_default(),
                    name: response
                        .name
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_else(|| container.to_string()),
                    state: if running {
                        ContainerState::Running
                    } else {
                        ContainerState::Stopped
                    },
                }))
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, ModuleError> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let summaries = self.docker.list_containers(Some(options)).await?;

        let mut containers = Vec::new();
        for summary in summaries {
            let id = summary.id.unwrap_or_default();
            let state = state_from(summary.state.as_deref());
            for name in summary.names.unwrap_or_default() {
                containers.push(ContainerInfo {
                    id: id.clone(),
                    name: name.trim_start_matches('/').to_string(),
                    state,
                });
            }
        }
        Ok(containers)
    }
}
