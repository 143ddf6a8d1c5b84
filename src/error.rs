//! Error taxonomy for the scan engine.
//!
//! Each variant corresponds to one of the abstract error kinds in the
//! scanner's error-handling design: `Config` and `Canceled` are fatal and
//! propagate out of `main`; the rest are localized by the caller (to one
//! GVR, one resource, or one policy) and never abort the run.

use thiserror::Error;

use crate::catalog::Gvr;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScanError {
    /// Unparseable override URL, missing mTLS files, invalid log level.
    /// Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// GVR unknown to the discovery API, or the API server is unreachable.
    #[error("discovery error for {gvr}: {source}")]
    Discovery {
        gvr: Gvr,
        #[source]
        source: kube::Error,
    },

    /// A GVR that discovery has no record of at all (distinct from a
    /// transport failure while querying discovery).
    #[error("unknown resource type {gvr}")]
    UnknownGvr { gvr: Gvr },

    /// Forbidden while listing a resource.
    #[error("forbidden listing {gvr}{namespace}: {source}")]
    Auth {
        gvr: Gvr,
        namespace: String,
        #[source]
        source: kube::Error,
    },

    /// A policy targets an unknown GVR, or its serving endpoint cannot be
    /// resolved. Counted as `errored` in the policy grouping.
    #[error("policy '{policy}' config error: {reason}")]
    PolicyConfig { policy: String, reason: String },

    /// Transport failure or malformed response from a policy endpoint.
    #[error("evaluating policy '{policy}' against {resource_uid}: {reason}")]
    Evaluation {
        policy: String,
        resource_uid: String,
        reason: String,
    },

    /// `createOrPatch` failed after bounded retry.
    #[error("persisting report for resource {resource_uid}: {source}")]
    Persist {
        resource_uid: String,
        #[source]
        source: kube::Error,
    },

    /// The run's context was cancelled. Aborts the run; stale-report GC is
    /// not performed.
    #[error("scan canceled")]
    Canceled,

    /// Any other Kubernetes API error that isn't one of the above localized
    /// kinds (e.g. a failure listing namespaces).
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl ScanError {
    /// True when this error should localize to the affected unit of work
    /// (GVR, resource, or policy) rather than abort the whole scan.
    pub fn is_localized(&self) -> bool {
        matches!(
            self,
            ScanError::Discovery { .. }
                | ScanError::UnknownGvr { .. }
                | ScanError::Auth { .. }
                | ScanError::PolicyConfig { .. }
                | ScanError::Evaluation { .. }
                | ScanError::Persist { .. }
        )
    }

    /// True when the underlying Kubernetes error is `NotFound` or
    /// `Forbidden` — per §4.1, these must not abort the scan.
    pub fn is_not_found_or_forbidden(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(resp) if resp.code == 404 || resp.code == 403)
    }
}
