//! Service-level error type.

use crate::agent::AgentError;
use crate::executor::ExecutorError;
use crate::quota::QuotaError;
use thiserror::Error;

use super::structured::StructuredError;

/// Terminal failure of a service call.
///
/// Quota and budget variants carry user-facing messages including the tier
/// upgrade text; the rest wrap the failing layer's own error.
#[derive(Debug, Error)]
pub enum AiError {
    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Structured(#[from] StructuredError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}
