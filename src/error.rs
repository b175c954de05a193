use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("[{backend}] Authentication failed: {message}")]
    AuthenticationFailed {
        backend: &'static str,
        message: String,
    },

    #[error("Could not find cluster ({0})")]
    ClusterNotFound(String),

    #[error("Could not find cluster template named {0}")]
    TemplateNotFound(String),

    #[error("{name} matches multiple clusters: {}", .candidates.join(", "))]
    AmbiguousCluster {
        name: String,
        candidates: Vec<String>,
    },

    #[error("[{backend}] {operation} is not supported")]
    NotSupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("Cluster ({name}) is in a failed state ({status}): {}", .details.as_deref().unwrap_or("no details reported"))]
    ClusterFailed {
        name: String,
        status: String,
        details: Option<String>,
    },

    #[error("Unable to delete cluster ({0}), an error occurred while deleting")]
    DeleteFailed(String),

    #[error("The wait was cancelled before the cluster reached a terminal state")]
    WaitCancelled,

    #[error("Invalid credentials bundle: {0}")]
    InvalidBundle(String),

    #[error("Credentials invalid or cluster unreachable: {0}")]
    VerificationFailed(String),

    #[error("Unexpected response from {url} ({status})")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("[{backend}] Unable to {operation}: {source}")]
    Backend {
        backend: &'static str,
        operation: String,
        #[source]
        source: Box<Error>,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when the error, at any wrapping depth, reports a missing resource.
    /// Callers rely on this to special-case races such as deleting a cluster
    /// that is already gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ClusterNotFound(_) | Error::TemplateNotFound(_) => true,
            Error::Backend { source, .. } => source.is_not_found(),
            Error::Http(err) => err.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Error::UnexpectedStatus { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Strip the backend/operation wrapping down to the original error.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Backend { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Label an error with the backend it crossed and the operation being
    /// attempted, keeping the cause available for inspection.
    pub(crate) fn wrap(self, backend: &'static str, operation: impl Into<String>) -> Self {
        match self {
            // Errors that already carry their backend identity read better unwrapped.
            err @ (Error::NotSupported { .. } | Error::AuthenticationFailed { .. }) => err,
            err => Error::Backend {
                backend,
                operation: operation.into(),
                source: Box::new(err),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_pierces_backend_wrapping() {
        let err = Error::ClusterNotFound("web".to_string()).wrap("make-coe", "delete cluster");
        assert!(err.is_not_found());

        let err = Error::Config("missing username".to_string()).wrap("make-coe", "delete cluster");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_ambiguous_cluster_names_all_candidates() {
        let err = Error::AmbiguousCluster {
            name: "foo".to_string(),
            candidates: vec!["foo-1".to_string(), "foo-2".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("foo-1"));
        assert!(message.contains("foo-2"));
    }

    #[test]
    fn test_backend_wrap_keeps_identity_errors_bare() {
        let err = Error::NotSupported {
            backend: "magnum",
            operation: "autoscaling",
        }
        .wrap("magnum", "set autoscale");
        assert!(matches!(err, Error::NotSupported { .. }));
    }
}
