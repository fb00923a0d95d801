use crate::types::SessionState;

/// Failures reported by a [`TrackingService`](crate::service::TrackingService) backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("service rejected the request: {0}")]
    Rejected(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("installed service version {installed} is older than required {required}")]
    VersionMismatch { required: u32, installed: u32 },

    #[error("no such area description: {0}")]
    UnknownAreaDescription(String),

    #[error("service I/O failure: {0}")]
    Io(String),

    #[error("service is not connected")]
    NotConnected,
}

/// Errors surfaced by the session controller and the ADF registry.
#[derive(Debug, thiserror::Error)]
pub enum AreaLearningError {
    #[error("configuration rejected: {0}")]
    Config(String),

    #[error("connection refused: {0}")]
    Connection(String),

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("failed to persist: {0}")]
    Persist(String),

    #[error("`{operation}` is not valid while the session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("tracking service error: {0}")]
    Service(#[from] ServiceError),

    #[error("JNI error: {0}")]
    Jni(#[from] jni::errors::Error),
}

impl AreaLearningError {
    pub(crate) fn adf_not_found(id: &str) -> Self {
        AreaLearningError::NotFound {
            what: "area description",
            name: id.to_string(),
        }
    }

    pub(crate) fn key_not_found(key: &str) -> Self {
        AreaLearningError::NotFound {
            what: "metadata key",
            name: key.to_string(),
        }
    }

    /// Java exception class thrown at the JNI boundary for this error.
    pub fn java_exception_class(&self) -> &'static str {
        match self {
            AreaLearningError::InvalidState { .. } => "java/lang/IllegalStateException",
            AreaLearningError::Config(_) | AreaLearningError::NotFound { .. } => {
                "java/lang/IllegalArgumentException"
            }
            AreaLearningError::Persist(_) | AreaLearningError::Connection(_) => {
                "java/io/IOException"
            }
            AreaLearningError::Service(_) | AreaLearningError::Jni(_) => {
                "java/lang/RuntimeException"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_the_item() {
        let err = AreaLearningError::adf_not_found("abc");
        assert_eq!(err.to_string(), "area description not found: abc");
        let err = AreaLearningError::key_not_found("name");
        assert_eq!(err.to_string(), "metadata key not found: name");
    }

    #[test]
    fn test_exception_class_mapping() {
        let err = AreaLearningError::InvalidState {
            operation: "connect",
            state: SessionState::Disconnected,
        };
        assert_eq!(err.java_exception_class(), "java/lang/IllegalStateException");
        assert_eq!(
            AreaLearningError::Persist("disk".into()).java_exception_class(),
            "java/io/IOException"
        );
        assert_eq!(
            AreaLearningError::from(ServiceError::NotConnected).java_exception_class(),
            "java/lang/RuntimeException"
        );
    }
}
