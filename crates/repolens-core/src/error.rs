//! Error taxonomy for the ingestion, retrieval, and review pipeline.
//!
//! Library functions return `anyhow::Result`; the variants below are the
//! conditions callers need to tell apart, recovered with
//! [`anyhow::Error::downcast_ref`].

/// Typed pipeline failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing credentials or invalid settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// No index has been built for this repository yet.
    #[error("no index found for {repo_id}; index the repository first")]
    IndexNotFound { repo_id: String },

    /// A collaborator call (git, GitHub, embedding, chat) failed.
    #[error("{operation} failed: {message}")]
    External {
        operation: &'static str,
        message: String,
    },

    /// The model's structured review output could not be parsed.
    #[error("malformed review output: {0}")]
    MalformedReview(String),

    /// A repository identifier that is neither `local::` nor `github::`.
    #[error("invalid repo id '{0}': expected local::<path> or github::<owner>/<name>")]
    InvalidRepoId(String),
}

impl PipelineError {
    pub fn external(operation: &'static str, message: impl Into<String>) -> Self {
        Self::External {
            operation,
            message: message.into(),
        }
    }
}

/// Returns true when `err` (or anything in its chain) is an
/// [`PipelineError::IndexNotFound`].
pub fn is_index_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<PipelineError>(),
            Some(PipelineError::IndexNotFound { .. })
        )
    })
}

/// Finds the first [`PipelineError`] in an error chain.
pub fn find_pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_not_found_survives_context() {
        let err: anyhow::Result<()> = Err(PipelineError::IndexNotFound {
            repo_id: "github::acme/api".to_string(),
        }
        .into());
        let err = err.context("loading index").unwrap_err();
        assert!(is_index_not_found(&err));
    }

    #[test]
    fn test_other_errors_are_not_not_found() {
        let err = anyhow::anyhow!("connection refused");
        assert!(!is_index_not_found(&err));
        assert!(find_pipeline_error(&err).is_none());
    }

    #[test]
    fn test_find_pipeline_error() {
        let err: anyhow::Error = PipelineError::MalformedReview("missing summary".into()).into();
        assert!(matches!(
            find_pipeline_error(&err),
            Some(PipelineError::MalformedReview(_))
        ));
    }
}
