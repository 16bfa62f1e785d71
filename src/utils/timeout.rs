//! Timeout and cancellation helpers
//!
//! Every suspension point in a lifecycle flow (adapter RPC, compose
//! subprocess) is raced against a per-operation timeout and the flow-wide
//! cancellation token.
//!
//! **Default Timeouts**:
//! - Adapter RPC: 30 seconds
//! - Interactive adapter `run`: none
//! - Compose commands: none (user-interactive)

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::module::traits::ModuleError;

/// Default timeout for adapter RPCs
pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Race `operation` against an optional timeout and a cancellation token
///
/// Cancellation wins over a simultaneous completion; the operation future is
/// dropped without being polled further.
pub async fn with_deadline<F, T>(
    operation: F,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    label: &str,
) -> Result<T, ModuleError>
where
    F: Future<Output = Result<T, ModuleError>>,
{
    match timeout {
        Some(duration) => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ModuleError::Cancelled),
                result = tokio::time::timeout(duration, operation) => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(ModuleError::Timeout {
                        operation: label.to_string(),
                        after: duration,
                    }),
                },
            }
        }
        None => {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ModuleError::Cancelled),
                result = operation => result,
            }
        }
    }
}
