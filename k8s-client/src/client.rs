//! The `OrchestratorClient` capability set (spec §9 Design Notes): create,
//! delete, get by name, label-selector list, watch-with-cache -- plus the
//! read-only Pod lookups the endpoint resolver needs (spec §4.5 step 7).

use crate::{
    crd::{Sandbox, SandboxClaim, WorkloadTemplate, LABEL_SANDBOX_NAME},
    error::OrchestratorError,
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client, Resource, ResourceExt,
};
use kube_runtime::watcher::{self, Event};

/// The six-ish operations the pipeline and reconciler need against the
/// orchestrator, behind a trait so the creation pipeline and reconciler can
/// be driven by a fake client in tests (spec §8 S1-S6) instead of a live
/// cluster.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn create_sandbox(&self, namespace: &str, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError>;

    /// Deletes the sandbox; a 404 from the API server is treated as success
    /// (spec §4.6 GC step 2, and pipeline rollback).
    async fn delete_sandbox(&self, namespace: &str, name: &str) -> Result<(), OrchestratorError>;

    async fn get_sandbox(&self, namespace: &str, name: &str) -> Result<Sandbox, OrchestratorError>;

    async fn create_claim(&self, namespace: &str, claim: &SandboxClaim) -> Result<SandboxClaim, OrchestratorError>;

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), OrchestratorError>;

    /// Direct get-by-name lookup for the pod the pipeline expects
    /// (`<sandbox-name>`); `Ok(None)` when absent, not an error -- the
    /// pipeline falls back to the label selector (spec §4.5 step 7).
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, OrchestratorError>;

    async fn list_pods_by_sandbox(
        &self,
        namespace: &str,
        sandbox_name: &str,
    ) -> Result<Vec<Pod>, OrchestratorError>;
}

/// Thin wrapper so callers don't need to depend on `kube_runtime` directly.
#[derive(Clone, Debug)]
pub enum SandboxEvent {
    Applied(Sandbox),
    Deleted(Sandbox),
    /// The watcher resynchronised; callers with per-key waiters don't need
    /// to do anything special, this just passes the restart through.
    Restarted,
}

/// Watches all `Sandbox` objects in `namespace`, translating the
/// `kube_runtime::watcher` event stream into `SandboxEvent`s. The core only
/// requires at-least-once delivery of status transitions (spec §4.4); a
/// watcher restart (e.g. after a `410 Gone`) satisfies that because it
/// relists every object's current state.
pub fn watch_sandboxes(
    client: Client,
    namespace: &str,
) -> impl Stream<Item = Result<SandboxEvent, OrchestratorError>> {
    let api: Api<Sandbox> = Api::namespaced(client, namespace);
    watcher::watcher(api, ListParams::default()).map(|event| {
        event
            .map(|event| match event {
                Event::Applied(sandbox) => SandboxEvent::Applied(sandbox),
                Event::Deleted(sandbox) => SandboxEvent::Deleted(sandbox),
                Event::Restarted(_) => SandboxEvent::Restarted,
            })
            .map_err(|source| {
                OrchestratorError::from_kube(namespace, "*", kube::Error::Service(Box::new(source)))
            })
    })
}

/// Watches all `WorkloadTemplate` objects in `namespace` for `WorkloadCache`
/// (spec §2 "populated by watching the orchestrator"). Reuses `SandboxEvent`
/// shape conceptually but returns the raw object since the cache does its
/// own apply/delete bookkeeping.
pub fn watch_workload_templates(
    client: Client,
    namespace: &str,
) -> impl Stream<Item = Result<Event<WorkloadTemplate>, OrchestratorError>> {
    let api: Api<WorkloadTemplate> = Api::namespaced(client, namespace);
    watcher::watcher(api, ListParams::default()).map(|event| {
        event.map_err(|source| {
            OrchestratorError::from_kube(namespace, "*", kube::Error::Service(Box::new(source)))
        })
    })
}

/// Production implementation backed by a real `kube::Client`.
///
/// One instance is constructed per `(namespace, principal)` cache entry in
/// `ClientCache` -- the client itself carries the caller's impersonated
/// identity, so every call it issues is made as the caller, per spec §4.8.
#[derive(Clone)]
pub struct KubeOrchestratorClient {
    client: Client,
}

impl KubeOrchestratorClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn sandboxes(&self, namespace: &str) -> Api<Sandbox> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn claims(&self, namespace: &str) -> Api<SandboxClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl OrchestratorClient for KubeOrchestratorClient {
    async fn create_sandbox(&self, namespace: &str, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError> {
        let name = sandbox.name_any();
        self.sandboxes(namespace)
            .create(&PostParams::default(), sandbox)
            .await
            .map_err(|e| OrchestratorError::from_kube(namespace, name, e))
    }

    async fn delete_sandbox(&self, namespace: &str, name: &str) -> Result<(), OrchestratorError> {
        delete_ignoring_not_found(self.sandboxes(namespace), namespace, name).await
    }

    async fn get_sandbox(&self, namespace: &str, name: &str) -> Result<Sandbox, OrchestratorError> {
        self.sandboxes(namespace)
            .get(name)
            .await
            .map_err(|e| OrchestratorError::from_kube(namespace, name, e))
    }

    async fn create_claim(&self, namespace: &str, claim: &SandboxClaim) -> Result<SandboxClaim, OrchestratorError> {
        let name = claim.name_any();
        self.claims(namespace)
            .create(&PostParams::default(), claim)
            .await
            .map_err(|e| OrchestratorError::from_kube(namespace, name, e))
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<(), OrchestratorError> {
        delete_ignoring_not_found(self.claims(namespace), namespace, name).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, OrchestratorError> {
        match self.pods(namespace).get(name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
            Err(e) => Err(OrchestratorError::from_kube(namespace, name, e)),
        }
    }

    async fn list_pods_by_sandbox(
        &self,
        namespace: &str,
        sandbox_name: &str,
    ) -> Result<Vec<Pod>, OrchestratorError> {
        let selector = format!("{}={}", LABEL_SANDBOX_NAME, sandbox_name);
        let lp = ListParams::default().labels(&selector);
        self.pods(namespace)
            .list(&lp)
            .await
            .map(|list| list.items)
            .map_err(|e| OrchestratorError::from_kube(namespace, sandbox_name, e))
    }
}

async fn delete_ignoring_not_found<K>(api: Api<K>, namespace: &str, name: &str) -> Result<(), OrchestratorError>
where
    K: Clone + std::fmt::Debug + serde::de::DeserializeOwned + Resource<DynamicType = ()>,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(e) => Err(OrchestratorError::from_kube(namespace, name, e)),
    }
}

/// Ownership check for the label-selector fallback (spec §4.5 step 7):
/// `ownerReference kind = Sandbox, name matches, controller flag true`.
pub fn pod_owned_by_sandbox(pod: &Pod, sandbox_name: &str) -> bool {
    pod.meta()
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.kind == "Sandbox" && owner.name == sandbox_name && owner.controller.unwrap_or(false))
}

/// The pod's assigned address, or `None` if not yet scheduled.
pub fn pod_address(pod: &Pod) -> Option<String> {
    pod.status.as_ref()?.pod_ip.clone()
}

pub fn pod_phase(pod: &Pod) -> Option<String> {
    pod.status.as_ref()?.phase.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn pod_with_owner(kind: &str, name: &str, controller: Option<bool>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                owner_references: Some(vec![OwnerReference {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    controller,
                    ..Default::default()
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn recognizes_controller_owner() {
        let pod = pod_with_owner("Sandbox", "sbx-1", Some(true));
        assert!(pod_owned_by_sandbox(&pod, "sbx-1"));
    }

    #[test]
    fn rejects_non_controller_owner() {
        let pod = pod_with_owner("Sandbox", "sbx-1", Some(false));
        assert!(!pod_owned_by_sandbox(&pod, "sbx-1"));
    }

    #[test]
    fn rejects_wrong_kind() {
        let pod = pod_with_owner("ReplicaSet", "sbx-1", Some(true));
        assert!(!pod_owned_by_sandbox(&pod, "sbx-1"));
    }

    #[test]
    fn rejects_name_mismatch() {
        let pod = pod_with_owner("Sandbox", "sbx-other", Some(true));
        assert!(!pod_owned_by_sandbox(&pod, "sbx-1"));
    }

    #[test]
    fn pod_without_status_has_no_address() {
        let pod = Pod::default();
        assert_eq!(pod_address(&pod), None);
    }
}
