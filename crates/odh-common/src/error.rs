//! Error types for the ODH operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the resource or operation it relates to so log
//! lines and status messages point at the failing object.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for ODH operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a platform object
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the object with invalid content
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.devFlags.manifests")
        field: Option<String>,
    },

    /// Cluster-wide configuration is missing or ambiguous
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what is wrong with the cluster configuration
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "deploy", "gc", "discovery")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a named resource and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Build an API error carrying an HTTP status code
    ///
    /// Useful for client implementations that are not backed by a real API
    /// server but must report the same failure modes.
    pub fn api(code: u16, reason: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Kube {
            source: kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: msg.into(),
                reason: reason.into(),
                code,
            }),
        }
    }

    /// Build a NotFound (404) API error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::api(404, "NotFound", msg)
    }

    /// Build a Conflict (409) API error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::api(409, "Conflict", msg)
    }

    /// HTTP status code of an API error, if this is one
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// True when the API server answered 404
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// True when the API server rejected a write on resourceVersion (409)
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Check if this error is retryable
    ///
    /// Validation, configuration and serialization errors need a fix to the
    /// input and are not retryable. Kubernetes errors are retryable unless the
    /// server rejected the request with a 4xx other than conflict.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 409 || !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Configuration { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Validation { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error Classification in the Reconcile Loop
    // ==========================================================================
    //
    // The reconciler decides whether to requeue quickly, requeue slowly, or
    // surface a status condition based on how an error is classified here.

    /// Story: A conflicting status write is retried, a bad request is not
    #[test]
    fn story_api_errors_are_classified_by_status_code() {
        let err = Error::conflict("object has been modified");
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert!(!err.is_not_found());

        let err = Error::not_found("dashboards.components \"default\" not found");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        let err = Error::api(422, "Invalid", "spec.replicas: must be positive");
        assert_eq!(err.api_code(), Some(422));
        assert!(!err.is_retryable());

        let err = Error::api(503, "ServiceUnavailable", "etcd leader changed");
        assert!(err.is_retryable());
    }

    /// Story: Missing or duplicate singletons are configuration problems
    #[test]
    fn story_configuration_errors_need_operator_intervention() {
        let err = Error::configuration("expected exactly one DSCInitialization, found 2");
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("found 2"));
        assert!(!err.is_retryable());
        assert_eq!(err.api_code(), None);
    }

    /// Story: Validation errors name the offending object and field
    #[test]
    fn story_validation_errors_include_resource_context() {
        let err = Error::validation_for_field(
            "default-dashboard",
            "spec.devFlags.manifests[0].uri",
            "remote manifests are not supported",
        );
        assert!(err.to_string().contains("default-dashboard"));
        assert_eq!(err.context(), Some("default-dashboard"));
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.devFlags.manifests[0].uri"));
            }
            _ => panic!("Expected Validation variant"),
        }

        let err = Error::validation("no name");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
    }

    #[test]
    fn test_internal_error_context() {
        let err = Error::internal_with_context("gc", "discovery returned no groups");
        assert_eq!(err.context(), Some("gc"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("[gc]"));
    }

    #[test]
    fn test_serde_json_errors_become_serialization_errors() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_retryable());

        let err = Error::serialization_for_kind("Deployment", "missing spec");
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Deployment")),
            _ => panic!("Expected Serialization variant"),
        }
    }
}
