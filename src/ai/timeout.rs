//! Timeout and Cancellation Helpers
//!
//! Wrap engine and sandbox awaits so that a wall-clock budget or a run's
//! cancellation token can interrupt them. The interrupted future is dropped,
//! which for sandbox calls also drops (and removes) the workspace.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::types::{Result, VerigenError};

/// Execute an async operation with a timeout
///
/// Returns `VerigenError::Timeout` if the operation doesn't complete within
/// `timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(VerigenError::timeout(operation_name, timeout)),
    }
}

/// Race an operation against a cancellation token
pub async fn cancellable<T, F>(token: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(VerigenError::Cancelled),
        result = future => result,
    }
}
