//! The workload template (spec §3 "Workload template"): external, immutable
//! from the core's perspective, populated into `WorkloadCache` by watching
//! the orchestrator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `(namespace, name)` identity of a workload template.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WorkloadId {
    pub namespace: String,
    pub name: String,
}

impl WorkloadId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Which HTTP surface (and therefore which session lifecycle variant)
/// a template serves: plain `/v1/agent-runtime` vs `/v1/code-interpreter`
/// (the latter gets the extra `/init` POST in pipeline step 8).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Runtime,
    Interpreter,
}

/// Transport/semantic tag for an exposed port.
///
/// `EnumString` (rather than a hand-written `FromStr`) gives
/// `WorkloadCache`'s CRD-to-template conversion a case-insensitive parse for
/// free, the same `strum`-derived parsing the teacher leans on for its own
/// wire-facing enums (`common/src/types/mod.rs`'s `Channel`/`ChannelVs`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::EnumString)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[strum(serialize = "HTTP", serialize = "http")]
    Http,
    #[strum(serialize = "TCP", serialize = "tcp")]
    Tcp,
    #[strum(serialize = "GRPC", serialize = "grpc")]
    Grpc,
}

/// A single port the workload exposes, annotated with how callers should
/// address it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: Protocol,
    pub path_prefix: String,
}

/// Whether the template requires an embedded public key to be available
/// before a sandbox can be created (pipeline step 2's `DependencyMissing`
/// check).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum WorkloadAuthMode {
    None,
    EmbeddedPublicKey,
}

impl Default for WorkloadAuthMode {
    fn default() -> Self {
        WorkloadAuthMode::None
    }
}

/// A workload template as resolved from `WorkloadCache`.
///
/// `pod_shape` is deliberately opaque: template-to-pod-spec transformation is
/// out of scope for this core (spec §1), so it is carried as an untyped JSON
/// value from the orchestrator's CRD straight into the `Sandbox` spec the
/// pipeline creates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkloadTemplate {
    pub id: WorkloadId,
    pub kind: WorkloadKind,
    pub pod_shape: serde_json::Value,
    pub exposed_ports: Vec<ExposedPort>,
    pub session_ttl: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub warm_pool_size: Option<u32>,
    pub auth_mode: WorkloadAuthMode,
    /// Empty string normalizes to `None` per pipeline step 2.
    pub runtime_class: Option<String>,
}

impl WorkloadTemplate {
    pub fn requires_public_key(&self) -> bool {
        matches!(self.auth_mode, WorkloadAuthMode::EmbeddedPublicKey)
    }

    pub fn has_warm_pool(&self) -> bool {
        self.warm_pool_size.map(|n| n > 0).unwrap_or(false)
    }

    /// Normalizes an empty runtime-class string to `None`, per pipeline step 2.
    pub fn normalized_runtime_class(&self) -> Option<&str> {
        self.runtime_class
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}
