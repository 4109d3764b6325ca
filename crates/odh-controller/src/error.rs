//! Reconcile error taxonomy

use odh_manifests::ManifestError;
use thiserror::Error;

/// Outcome of a failed action
///
/// `Stop` is an expected terminal condition: the chain halts, the reason is
/// surfaced in status and nothing is logged as a failure. `Transient` errors
/// requeue quickly. `Fatal` errors are unexpected and requeue on a long
/// interval.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Expected halt of the action chain
    #[error("{reason}: {message}")]
    Stop {
        /// Machine-readable reason written to status
        reason: String,
        /// Human-readable explanation
        message: String,
    },

    /// Cluster error worth retrying soon
    #[error(transparent)]
    Transient(odh_common::Error),

    /// Anything else
    #[error("{0}")]
    Fatal(String),
}

impl ReconcileError {
    /// Create a stop error
    pub fn stop(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stop {
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Create a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// True for [`ReconcileError::Stop`]
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop { .. })
    }

    /// Label value used for the error metric
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Stop { .. } => "stop",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }

    /// Reason to surface in status conditions
    pub fn reason(&self) -> &str {
        match self {
            Self::Stop { reason, .. } => reason,
            Self::Transient(_) => "ReconcileError",
            Self::Fatal(_) => "ReconcileFailed",
        }
    }

    /// Prefix the message with what was being done
    pub fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            Self::Fatal(msg) => Self::Fatal(format!("{what}: {msg}")),
            other => other,
        }
    }
}

impl From<odh_common::Error> for ReconcileError {
    fn from(err: odh_common::Error) -> Self {
        if err.is_retryable() {
            Self::Transient(err)
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(err: kube::Error) -> Self {
        odh_common::Error::from(err).into()
    }
}

impl From<ManifestError> for ReconcileError {
    fn from(err: ManifestError) -> Self {
        Self::Fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_transient() {
        let err: ReconcileError = odh_common::Error::conflict("object modified").into();
        assert!(matches!(err, ReconcileError::Transient(_)));
        assert_eq!(err.error_type(), "transient");
    }

    #[test]
    fn validation_errors_are_fatal() {
        let err: ReconcileError = odh_common::Error::validation("bad spec").into();
        assert!(matches!(err, ReconcileError::Fatal(_)));
        assert!(err.to_string().contains("bad spec"));
    }

    #[test]
    fn render_errors_are_fatal() {
        let err: ReconcileError = ManifestError::decode("deployment.yaml[0]", "missing kind").into();
        assert!(matches!(err, ReconcileError::Fatal(_)));
        assert!(err.to_string().contains("deployment.yaml[0]"));
    }

    #[test]
    fn stop_carries_reason() {
        let err = ReconcileError::stop("ServiceMeshNotConfigured", "mesh is required");
        assert!(err.is_stop());
        assert_eq!(err.reason(), "ServiceMeshNotConfigured");
        assert_eq!(err.to_string(), "ServiceMeshNotConfigured: mesh is required");
    }

    #[test]
    fn context_prefixes_fatal_only() {
        let err = ReconcileError::fatal("boom").context("deploying ConfigMap x");
        assert_eq!(err.to_string(), "deploying ConfigMap x: boom");
        let stop = ReconcileError::stop("R", "m").context("ignored");
        assert_eq!(stop.to_string(), "R: m");
    }
}
