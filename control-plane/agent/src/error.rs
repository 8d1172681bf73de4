//! The `agent`-crate error taxonomy (spec §7): `PipelineError`, `AuthError`,
//! plus the single `HttpError` surface everything converts into at the HTTP
//! boundary. Grounded on `store::StoreError`/`k8s_client::OrchestratorError`'s
//! per-crate `snafu` enum convention.

use common_lib::ErrorCode;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    #[snafu(display("workload template '{}' not found", id))]
    WorkloadNotFound { id: String },

    #[snafu(display("template '{}' requires an embedded public key that is not yet cached", id))]
    DependencyMissing { id: String },

    #[snafu(display("failed to write placeholder session record: {}", source))]
    PlaceholderWrite { source: store::StoreError },

    #[snafu(display("orchestrator rejected object creation: {}", source))]
    ObjectCreate { source: k8s_client::OrchestratorError },

    #[snafu(display("failed to build a caller-scoped client: {}", source))]
    ClientBuild { source: crate::client_factory::ClientFactoryError },

    #[snafu(display("timed out waiting for sandbox '{}/{}' to become ready", namespace, name))]
    WaitTimeout { namespace: String, name: String },

    #[snafu(display("endpoint resolution failed for sandbox '{}/{}': {}", namespace, name, source))]
    EndpointResolve {
        namespace: String,
        name: String,
        source: k8s_client::OrchestratorError,
    },

    #[snafu(display("sandbox init POST to '{}' failed: {}", endpoint, source))]
    SandboxInit { endpoint: String, source: reqwest::Error },

    #[snafu(display("template for '{}' exposes no ports to POST /init against", id))]
    NoEntryPoints { id: String },

    #[snafu(display("failed to sign the sandbox init token: {}", source))]
    InitTokenSign { source: crate::jwt::SignError },

    #[snafu(display("failed to commit session '{}': {}", session_id, source))]
    Commit { session_id: String, source: store::StoreError },

    #[snafu(display("failed to look up session '{}': {}", session_id, source))]
    Lookup { session_id: String, source: store::StoreError },

    #[snafu(display("session '{}' not found", session_id))]
    SessionNotFound { session_id: String },

    #[snafu(display("orchestrator call failed: {}", source))]
    Orchestrator { source: k8s_client::OrchestratorError },
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::WorkloadNotFound { .. } => ErrorCode::WorkloadNotFound,
            PipelineError::DependencyMissing { .. } => ErrorCode::DependencyMissing,
            PipelineError::SandboxInit { .. } => ErrorCode::SandboxInitFailed,
            PipelineError::WaitTimeout { .. } => ErrorCode::SandboxTimeout,
            PipelineError::Commit { .. } => ErrorCode::CommitFailed,
            PipelineError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            PipelineError::ObjectCreate { source } | PipelineError::Orchestrator { source } => source.code(),
            PipelineError::EndpointResolve { source, .. } => source.code(),
            PipelineError::PlaceholderWrite { .. }
            | PipelineError::ClientBuild { .. }
            | PipelineError::NoEntryPoints { .. }
            | PipelineError::Lookup { .. }
            | PipelineError::InitTokenSign { .. } => ErrorCode::Internal,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuthError {
    #[snafu(display("missing or malformed Authorization header"))]
    MissingBearer,

    #[snafu(display("identity review call failed: {}", source))]
    ReviewFailed { source: k8s_client::OrchestratorError },

    #[snafu(display("authentication rejected by the orchestrator"))]
    Unauthenticated,

    #[snafu(display("malformed principal: {}", source))]
    MalformedPrincipal { source: common_lib::principal::MalformedPrincipal },
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Unauthorized
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HttpError {
    #[snafu(display("{}", source))]
    Auth { source: AuthError },
    #[snafu(display("{}", source))]
    Pipeline { source: PipelineError },
    #[snafu(display("{}", source))]
    Store { source: store::StoreError },
    #[snafu(display("invalid request: {}", message))]
    Validation { message: String },
}

impl HttpError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HttpError::Auth { source } => source.code(),
            HttpError::Pipeline { source } => source.code(),
            HttpError::Store { source } => source.code(),
            HttpError::Validation { .. } => ErrorCode::InvalidRequest,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<AuthError> for HttpError {
    fn from(source: AuthError) -> Self {
        HttpError::Auth { source }
    }
}

impl From<PipelineError> for HttpError {
    fn from(source: PipelineError) -> Self {
        HttpError::Pipeline { source }
    }
}

impl From<store::StoreError> for HttpError {
    fn from(source: store::StoreError) -> Self {
        HttpError::Store { source }
    }
}
