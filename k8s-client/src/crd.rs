//! The orchestrator-side declarative contract (spec §3/§6): `Sandbox` and
//! `SandboxClaim` objects. The core only ever creates, deletes, gets, lists
//! and watches these -- their reconciliation into pods/services belongs to
//! the external orchestrator (spec §1 Non-goals).

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const GROUP: &str = "agentcube.io";
pub const VERSION: &str = "v1alpha1";

/// `managed-by` label value stamped on every object this core creates, so
/// sibling control-plane deployments sharing a cluster never clobber each
/// other's sandboxes.
pub const MANAGED_BY: &str = "agentcube-core";

pub const LABEL_SESSION_ID: &str = "agentcube.io/session-id";
pub const LABEL_WORKLOAD_NAME: &str = "agentcube.io/workload-name";
pub const LABEL_SANDBOX_NAME: &str = "agentcube.io/sandbox-name";
pub const LABEL_MANAGED_BY: &str = "agentcube.io/managed-by";
pub const ANNOTATION_IDLE_TIMEOUT: &str = "agentcube.io/idle-timeout";
pub const ANNOTATION_LAST_ACTIVITY: &str = "agentcube.io/last-activity-time";

/// `type=Ready` condition reason meaning the orchestrator's networking and
/// other dependencies are actually provisioned, not just "object accepted"
/// (spec §4.7, §9 Open Question 3: the stricter variant).
pub const READY_REASON_DEPENDENCIES_READY: &str = "DependenciesReady";

#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "agentcube.io",
    version = "v1alpha1",
    kind = "Sandbox",
    plural = "sandboxes",
    shortname = "sbx",
    status = "SandboxStatus",
    namespaced
)]
pub struct SandboxSpec {
    /// Opaque pod shape carried straight from the workload template's
    /// `pod_shape`; transforming it is the orchestrator's job (spec §1).
    pub pod_template: serde_json::Value,
    /// Absolute wall-clock time the orchestrator should shut the sandbox
    /// down at. Always `created_at + TTL` (spec §6).
    pub shutdown_time: DateTime<Utc>,
    /// Always 1 (spec §3).
    pub replicas: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SandboxCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SandboxStatus {
    #[serde(default)]
    pub conditions: Vec<SandboxCondition>,
}

impl SandboxStatus {
    pub fn condition(&self, type_: &str) -> Option<&SandboxCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "agentcube.io",
    version = "v1alpha1",
    kind = "SandboxClaim",
    plural = "sandboxclaims",
    shortname = "sbxc",
    namespaced
)]
pub struct SandboxClaimSpec {
    /// The name of the `WorkloadTemplate` this claim is bound against.
    pub template_name: String,
    pub session_id: String,
    pub sandbox_name: String,
}

/// The orchestrator-side declarative object a `WorkloadTemplate` is stored
/// as (spec §3 "Workload template"). `WorkloadCache` watches these and
/// converts them into `common_lib::types::WorkloadTemplate`; the core never
/// creates, updates or deletes one -- it is immutable from the core's
/// perspective.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "agentcube.io",
    version = "v1alpha1",
    kind = "WorkloadTemplate",
    plural = "workloadtemplates",
    shortname = "wktpl",
    namespaced
)]
pub struct WorkloadTemplateSpec {
    pub kind: String,
    pub pod_template: serde_json::Value,
    #[serde(default)]
    pub exposed_ports: Vec<WorkloadTemplatePort>,
    pub session_ttl_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
    pub warm_pool_size: Option<u32>,
    #[serde(default)]
    pub auth_mode: String,
    #[serde(default)]
    pub runtime_class: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct WorkloadTemplatePort {
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub path_prefix: String,
}

/// Stamps `runtimeClassName` onto an opaque pod shape before it becomes a
/// `Sandbox`'s `pod_template` (spec §4.5 step 2's runtime-class normalization).
/// A `None` class (including the normalized-from-empty-string case) leaves
/// the shape untouched; a non-object shape is also left untouched since
/// there is no map to stamp a key onto.
pub fn with_runtime_class(pod_shape: &serde_json::Value, runtime_class: Option<&str>) -> serde_json::Value {
    let runtime_class = match runtime_class {
        Some(runtime_class) => runtime_class,
        None => return pod_shape.clone(),
    };
    let mut pod_shape = pod_shape.clone();
    if let Some(map) = pod_shape.as_object_mut() {
        map.insert("runtimeClassName".to_string(), serde_json::Value::String(runtime_class.to_string()));
    }
    pod_shape
}

/// Builds the label set every `Sandbox`/`SandboxClaim` this core creates
/// carries (spec §3 "Labels").
pub fn standard_labels(
    session_id: &str,
    workload_name: &str,
    sandbox_name: &str,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_SESSION_ID.to_string(), session_id.to_string());
    labels.insert(LABEL_WORKLOAD_NAME.to_string(), workload_name.to_string());
    labels.insert(LABEL_SANDBOX_NAME.to_string(), sandbox_name.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_runtime_class_stamps_the_shape() {
        let shape = serde_json::json!({ "containers": [] });
        let stamped = with_runtime_class(&shape, Some("gvisor"));
        assert_eq!(stamped["runtimeClassName"], "gvisor");
        assert_eq!(stamped["containers"], serde_json::json!([]));
    }

    #[test]
    fn with_runtime_class_leaves_shape_untouched_when_none() {
        let shape = serde_json::json!({ "containers": [] });
        assert_eq!(with_runtime_class(&shape, None), shape);
    }

    #[test]
    fn condition_lookup_finds_ready_by_type() {
        let status = SandboxStatus {
            conditions: vec![SandboxCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                reason: READY_REASON_DEPENDENCIES_READY.to_string(),
                message: String::new(),
            }],
        };
        assert!(status.condition("Ready").is_some());
        assert!(status.condition("Healthy").is_none());
    }
}
