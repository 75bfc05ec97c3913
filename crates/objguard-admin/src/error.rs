use objguard_core::{EngineError, StorageError};
use objguard_remote::RemoteUserError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("remote user error: {0}")]
    Remote(#[from] RemoteUserError),

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("'{0}' does not operate on the permission engine")]
    NotAnEngineCommand(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_display_unwrapped() {
        let err: AdminError = EngineError::NotFound("permission group editors@blog.post:1".to_string()).into();

        assert!(
            err.to_string().contains("editors@blog.post:1"),
            "expected group key in error message, got: {err}"
        );
    }

    #[test]
    fn storage_error_is_prefixed() {
        let err: AdminError = StorageError::InvalidNamespace("Bad".to_string()).into();

        assert!(err.to_string().starts_with("storage error:"), "got: {err}");
    }

    #[test]
    fn remote_status_is_reported() {
        let err: AdminError = RemoteUserError::Status(404).into();

        assert!(err.to_string().contains("404"), "got: {err}");
    }
}
