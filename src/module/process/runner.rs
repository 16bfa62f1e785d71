//! Subprocess runner
//!
//! Runs external commands with inherited stderr so users see progress, and
//! kills the child when the flow is cancelled.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::module::traits::{CommandOutput, CommandRunner, ModuleError};

/// `CommandRunner` backed by real subprocesses
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn spawn(program: &str, args: &[String], capture: bool) -> Result<Child, ModuleError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(if capture { Stdio::piped() } else { Stdio::inherit() })
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        debug!("Running {} {}", program, args.join(" "));

        command
            .spawn()
            .map_err(|e| ModuleError::io(program, "Failed to spawn", e))
    }
}

async fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill cancelled {} process: {}", program, e);
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<i32, ModuleError> {
        let mut child = Self::spawn(program, args, false)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                kill(&mut child, program).await;
                Err(ModuleError::Cancelled)
            }
            status = child.wait() => {
                let status = status.map_err(|e| ModuleError::io(program, "Failed to wait for", e))?;
                Ok(status.code().unwrap_or(-1))
            }
        }
    }

    async fn capture(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ModuleError> {
        let mut child = Self::spawn(program, args, true)?;
        let mut stdout = child.stdout.take().ok_or_else(|| ModuleError::Io {
            context: format!("No stdout pipe for {}", program),
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        })?;

        let completion = async {
            let mut buffer = String::new();
            stdout
                .read_to_string(&mut buffer)
                .await
                .map_err(|e| ModuleError::io(program, "Failed to read output of", e))?;
            let status = child
                .wait()
                .await
                .map_err(|e| ModuleError::io(program, "Failed to wait for", e))?;
            Ok::<_, ModuleError>(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout: buffer,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ModuleError::Cancelled),
            result = completion => result,
        }
    }
}
