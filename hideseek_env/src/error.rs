//! Error types for the collaborator boundary.

use crate::types::BodyId;
use thiserror::Error;

/// Errors reported by physics collaborators.
///
/// The engine never propagates these out of a tick; they are logged and the
/// command is dropped.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Command addressed a body that was never registered
    #[error("Unknown body: {0}")]
    UnknownBody(BodyId),

    /// Command addressed a body that is currently disabled
    #[error("Body disabled: {0}")]
    BodyDisabled(BodyId),

    /// Command carried a non-finite value
    #[error("Invalid command for {body}: {reason}")]
    InvalidCommand {
        body: BodyId,
        reason: String,
    },
}

impl EnvError {
    /// Creates an invalid-command error.
    pub fn invalid(body: BodyId, reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            body,
            reason: reason.into(),
        }
    }
}
