//! Errors for the Skills Registry (§4.2, §7). Maps onto `CoreError`'s
//! `ValidationError` kind for malformed manifests and `ResourceMissing` for
//! unknown skill names; plugin load failures additionally enqueue a repair
//! task rather than simply bubbling up.

use thiserror::Error;

use crate::error::CoreError;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill not found: {0}")]
    NotFound(String),

    #[error("malformed plugin manifest at {path}: {reason}")]
    InvalidManifest { path: String, reason: String },

    #[error("unknown handler tag: {0}")]
    UnknownHandler(String),

    #[error("skill {0} is denied by configuration")]
    Denied(String),

    #[error("sandboxed resource read escaped package directory: {0}")]
    PathEscape(String),

    #[error("skill execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SkillResult<T> = Result<T, SkillError>;

impl From<SkillError> for CoreError {
    fn from(err: SkillError) -> Self {
        match err {
            SkillError::NotFound(_) => CoreError::ResourceMissing(err.to_string()),
            SkillError::InvalidManifest { .. } | SkillError::UnknownHandler(_) => {
                CoreError::ValidationError(err.to_string())
            }
            SkillError::Denied(_) | SkillError::PathEscape(_) => {
                CoreError::SafetyViolation(err.to_string())
            }
            SkillError::ExecutionFailed(_) => CoreError::from(err.to_string()),
            SkillError::Io(e) => CoreError::Fatal(e.to_string()),
        }
    }
}
