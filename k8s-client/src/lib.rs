//! The orchestrator-facing half of the control plane: the `Sandbox`/
//! `SandboxClaim` CRD types, the error taxonomy for dealing with them, the
//! `OrchestratorClient` capability set, and the serving-readiness predicate
//! the reconciler evaluates against watch events.

pub mod client;
pub mod crd;
pub mod error;
pub mod readiness;

pub use client::{
    pod_address, pod_owned_by_sandbox, pod_phase, watch_sandboxes, watch_workload_templates,
    KubeOrchestratorClient, OrchestratorClient, SandboxEvent,
};
pub use crd::{Sandbox, SandboxClaim, SandboxCondition, SandboxStatus, WorkloadTemplate, WorkloadTemplateSpec};
pub use error::OrchestratorError;
pub use kube_runtime::watcher::Event;
pub use readiness::is_serving_ready;
