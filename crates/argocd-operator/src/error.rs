//! Error types for the Argo CD Kubernetes Operator

use thiserror::Error;

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    ReconcileFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Object exists but is managed by someone else
    #[error("Ownership conflict on {kind}/{name}: managed by '{manager}'")]
    OwnershipConflict {
        kind: String,
        name: String,
        manager: String,
    },

    /// A mutation in the request pipeline refused the object
    #[error("Mutation failed for {kind}/{name}: {reason}")]
    MutationFailed {
        kind: String,
        name: String,
        reason: String,
    },

    /// Generating secret material failed
    #[error("Credential generation failed: {0}")]
    Credentials(String),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl From<bcrypt::BcryptError> for OperatorError {
    fn from(e: bcrypt::BcryptError) -> Self {
        OperatorError::Credentials(e.to_string())
    }
}

impl OperatorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::KubeError(_) | OperatorError::ReconcileFailed(_)
        )
    }

    /// Get a suggested requeue delay for retryable errors
    pub fn requeue_delay(&self) -> Option<std::time::Duration> {
        if self.is_retryable() {
            Some(std::time::Duration::from_secs(30))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::OwnershipConflict {
            kind: "Deployment".to_string(),
            name: "example-server".to_string(),
            manager: "helm".to_string(),
        };
        assert!(err.to_string().contains("Deployment"));
        assert!(err.to_string().contains("example-server"));
        assert!(err.to_string().contains("helm"));
    }

    #[test]
    fn test_retryable_errors() {
        let reconcile_err = OperatorError::ReconcileFailed("test".to_string());
        assert!(reconcile_err.is_retryable());

        let validation_err = OperatorError::ValidationError("test".to_string());
        assert!(!validation_err.is_retryable());

        let conflict = OperatorError::OwnershipConflict {
            kind: "Service".to_string(),
            name: "x".to_string(),
            manager: "y".to_string(),
        };
        assert!(!conflict.is_retryable());
    }

    #[test]
    fn test_requeue_delay() {
        let retryable = OperatorError::ReconcileFailed("test".to_string());
        assert_eq!(
            retryable.requeue_delay(),
            Some(std::time::Duration::from_secs(30))
        );

        let not_retryable = OperatorError::InvalidConfig("test".to_string());
        assert!(not_retryable.requeue_delay().is_none());
    }

    #[test]
    fn test_api_errors_are_retryable() {
        let err = OperatorError::KubeError(kube::Error::Api(
            kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "conflict".to_string(),
                reason: "Conflict".to_string(),
                code: 409,
            },
        ));
        assert!(err.is_retryable());
        assert_eq!(err.requeue_delay(), Some(std::time::Duration::from_secs(30)));
    }
}
