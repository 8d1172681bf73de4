//! Orchestrator client error taxonomy (spec §7: NotFound / Forbidden /
//! OrchestratorTransient).

use common_lib::ErrorCode;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OrchestratorError {
    #[snafu(display("{} '{}/{}' not found", kind, namespace, name))]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[snafu(display(
        "orchestrator rejected the request for '{}/{}' as caller: {}",
        namespace,
        name,
        source
    ))]
    Forbidden {
        namespace: String,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("orchestrator call for '{}/{}' failed: {}", namespace, name, source))]
    Transient {
        namespace: String,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("pod '{}/{}' has no owner reference identifying it as a Sandbox", namespace, name))]
    NotOwned { namespace: String, name: String },

    #[snafu(display("pod '{}/{}' has no assigned address yet", namespace, name))]
    NoAddress { namespace: String, name: String },

    #[snafu(display("pod '{}/{}' is in phase '{}', not Running", namespace, name, phase))]
    NotRunning {
        namespace: String,
        name: String,
        phase: String,
    },
}

impl OrchestratorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestratorError::NotFound { .. } => ErrorCode::WorkloadNotFound,
            OrchestratorError::Forbidden { .. } => ErrorCode::Forbidden,
            _ => ErrorCode::SandboxCreateFailed,
        }
    }

    /// Classifies a raw `kube::Error` the way the pipeline needs to (spec
    /// §7's Forbidden vs OrchestratorTransient split): a 403 response from
    /// the API server is a caller-permission rejection, anything else is
    /// treated as transient and left to the caller's own retry/backoff.
    pub fn from_kube(namespace: impl Into<String>, name: impl Into<String>, source: kube::Error) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        if is_forbidden(&source) {
            OrchestratorError::Forbidden {
                namespace,
                name,
                source,
            }
        } else {
            OrchestratorError::Transient {
                namespace,
                name,
                source,
            }
        }
    }
}

fn is_forbidden(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 403)
}
