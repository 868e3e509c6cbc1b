//! The seven-member error taxonomy every reconcile and startup routine
//! reports through.

use std::time::Duration;

/// Classification of a failure from either object store or from pure
/// translation. Drives the reconcile-loop's requeue policy; see
/// [`SyncError::requeue_after`].
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    /// Either-side object absent. Never fatal; it drives direction
    /// decisions rather than failing a reconcile outright, but a syncer
    /// that hits this unexpectedly (e.g. a dangling index entry) reports it
    /// so the entry gets cleaned up.
    #[error("object not found: {0}")]
    NotFound(String),
    /// A write was rejected because of a stale `resourceVersion`. Always
    /// requeued, never retried against the stale copy.
    #[error("conflicting write: {0}")]
    Conflict(String),
    /// The object store rejected the request as unauthorized.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Translation produced an object the store rejected (e.g. schema
    /// validation). Likely stuck until the tenant fixes their input.
    #[error("invalid object: {0}")]
    Invalid(String),
    /// Connection or timeout error talking to a store.
    #[error("transient I/O error: {0}")]
    Transient(String),
    /// A Pod Security Standard check failed. Fails the reconcile
    /// permanently: no pObj is created, and the controller stays healthy.
    #[error("pod security policy violation: {0}")]
    PolicyViolation(String),
    /// A malformed mapping string or invalid selector. Surfaced at startup
    /// and aborts initialization; never produced mid-reconcile.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Alias used throughout the syncer crate.
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Whether the framework should requeue after this error, and with how
    /// much delay. `None` means the error is terminal for this key (orphan
    /// cleanup already happened, or a `PolicyViolation`/`ConfigError` that
    /// will not resolve itself).
    #[must_use]
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::NotFound(_) => None,
            Self::Conflict(_) => Some(Duration::ZERO),
            Self::Forbidden(_) | Self::Invalid(_) => Some(Duration::from_secs(30)),
            Self::Transient(_) => Some(Duration::from_secs(5)),
            Self::PolicyViolation(_) | Self::ConfigError(_) => None,
        }
    }
}

impl From<kube::Error> for SyncError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) => match resp.code {
                404 => Self::NotFound(resp.message.clone()),
                409 => Self::Conflict(resp.message.clone()),
                403 => Self::Forbidden(resp.message.clone()),
                422 => Self::Invalid(resp.message.clone()),
                _ => Self::Transient(err.to_string()),
            },
            _ => Self::Transient(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_requeues_immediately() {
        assert_eq!(SyncError::Conflict("stale".into()).requeue_after(), Some(Duration::ZERO));
    }

    #[test]
    fn policy_violation_does_not_requeue() {
        assert_eq!(SyncError::PolicyViolation("hostPort".into()).requeue_after(), None);
    }
}
