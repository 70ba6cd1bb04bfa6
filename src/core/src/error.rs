use thiserror::Error;

/// Image manipulation error types
#[derive(Error, Debug)]
pub enum ManipError {
    /// Reference resolved to zero images, or a named blob is missing
    #[error("not found: {0}")]
    NotFound(String),

    /// Reference resolved to more than one image
    #[error("multiple images found for {0}")]
    Ambiguous(String),

    /// Target is not a single-platform manifest, or an unknown media type
    #[error("unsupported media type: {0}")]
    Unsupported(String),

    /// Malformed manifest/config or layer/diff-ID mismatch
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Base-layer digest not present in the target chain
    #[error("base layer {digest} not found in image {image}")]
    BaseLayerNotFound { image: String, digest: String },

    /// Base prefix check failed
    #[error("layer {index} digest mismatch: image has {actual}, base has {expected}")]
    VerifyMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    /// First plan action is a fixup
    #[error("the first rewrite action cannot be a fixup")]
    FixupAtStart,

    /// Differ rejected a layer
    #[error("failed to apply layer {digest}: {message}")]
    ApplyFailed { digest: String, message: String },

    /// Differ output lacked the uncompressed-digest label
    #[error("differ returned no uncompressed digest for {0}")]
    DiffMissingDiffId(String),

    /// A resource with this name already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed digest string
    #[error("invalid digest {0:?}")]
    InvalidDigest(String),

    /// External cancellation
    #[error("operation aborted")]
    Aborted,

    /// Pass-through of a lower-layer runtime error
    #[error("host runtime error: {0}")]
    HostRuntime(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl ManipError {
    /// True for the `NotFound` kind; used by update-with-create fallbacks.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ManipError::NotFound(_))
    }

    /// True for the `AlreadyExists` kind; snapshot commits treat it as success.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ManipError::AlreadyExists(_))
    }
}

impl From<serde_json::Error> for ManipError {
    fn from(err: serde_json::Error) -> Self {
        ManipError::Serialization(err.to_string())
    }
}

impl From<tonic::Status> for ManipError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::NotFound => ManipError::NotFound(status.message().to_string()),
            tonic::Code::AlreadyExists => {
                ManipError::AlreadyExists(status.message().to_string())
            }
            tonic::Code::Cancelled => ManipError::Aborted,
            _ => ManipError::HostRuntime(status.to_string()),
        }
    }
}

/// Result type alias for image manipulation operations
pub type Result<T> = std::result::Result<T, ManipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_predicate() {
        assert!(ManipError::NotFound("x".to_string()).is_not_found());
        assert!(!ManipError::Aborted.is_not_found());
    }

    #[test]
    fn test_already_exists_predicate() {
        assert!(ManipError::AlreadyExists("snap".to_string()).is_already_exists());
        assert!(!ManipError::NotFound("x".to_string()).is_already_exists());
    }

    #[test]
    fn test_tonic_status_mapping() {
        let err: ManipError = tonic::Status::not_found("image").into();
        assert!(err.is_not_found());

        let err: ManipError = tonic::Status::already_exists("snapshot").into();
        assert!(err.is_already_exists());

        let err: ManipError = tonic::Status::internal("boom").into();
        assert!(matches!(err, ManipError::HostRuntime(_)));
    }

    #[test]
    fn test_verify_mismatch_message() {
        let err = ManipError::VerifyMismatch {
            index: 1,
            expected: "sha256:aaa".to_string(),
            actual: "sha256:bbb".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("layer 1"));
        assert!(msg.contains("sha256:aaa"));
        assert!(msg.contains("sha256:bbb"));
    }
}
