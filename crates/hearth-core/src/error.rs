//! Typed errors surfaced to callers of the core

use thiserror::Error;

pub type Result<T, E = HearthError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HearthError {
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("background shell not found: {0}")]
    TaskNotFound(String),

    #[error("tool provider not found: {0}")]
    ProviderNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("language server not found: {0}")]
    LspNotFound(String),

    #[error("permission request not found: {0}")]
    PermissionRequestNotFound(String),

    /// The user refused a permission request.
    #[error("permission denied")]
    PermissionDenied,

    #[error("session {0} is busy")]
    SessionBusy(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Hook(#[from] crate::hooks::HookError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HearthError {
    /// True for any lookup failure on an unknown id.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HearthError::InstanceNotFound(_)
                | HearthError::TaskNotFound(_)
                | HearthError::ProviderNotFound(_)
                | HearthError::SessionNotFound(_)
                | HearthError::LspNotFound(_)
                | HearthError::PermissionRequestNotFound(_)
        )
    }
}
