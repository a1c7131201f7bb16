use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced while assembling or running a pipeline.
///
/// Cache corruption and hashing fallbacks never appear here: both
/// degrade (to a cache miss and to best-effort hashing) and are only logged.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Stage: {stage} - required keys {missing:?} not satisfied")]
    UnsatisfiedRequirements {
        stage: String,
        missing: BTreeSet<String>,
    },

    #[error("Content key '{key}' is missing from the context")]
    MissingContentKey { key: String },

    #[error("Content key '{key}' must hold a string value")]
    ContentKeyNotString { key: String },

    #[error("Failed to create cache directory: {}", path.display())]
    CacheDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failure raised by a stage's own `process`. Passed through enclosing
    /// chains and caches untouched.
    #[error(transparent)]
    Stage(#[from] anyhow::Error),
}

pub type Result<T, E = FlowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_message_names_stage_and_keys() {
        let err = FlowError::UnsatisfiedRequirements {
            stage: "RequiresNonsense".to_string(),
            missing: ["nonsense".to_string()].into_iter().collect(),
        };
        let message = err.to_string();
        assert!(message.contains("RequiresNonsense"));
        assert!(message.contains("nonsense"));
    }

    #[test]
    fn test_stage_error_is_transparent() {
        let err: FlowError = anyhow::anyhow!("boom").into();
        assert_eq!(err.to_string(), "boom");
    }
}
