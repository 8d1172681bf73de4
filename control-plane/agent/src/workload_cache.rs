//! `WorkloadCache` (spec §2, §3): a read-only, reader-mostly cache of
//! workload templates, populated by watching the orchestrator's
//! `WorkloadTemplate` objects. The pipeline's only entry point into it is
//! `get`, which must reflect "a consistent snapshot of a single object"
//! (spec §5) -- never a half-applied partial update.

use common_lib::types::{ExposedPort, Protocol, WorkloadAuthMode, WorkloadId, WorkloadKind, WorkloadTemplate};
use k8s_client::{Event, WorkloadTemplate as WorkloadTemplateResource};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Snapshot cache of `(namespace, name) -> WorkloadTemplate`. Cloned values
/// are handed out on `get` so a reader never observes a template mutating
/// underneath it mid-use.
#[derive(Default)]
pub struct WorkloadCache {
    templates: RwLock<HashMap<WorkloadId, WorkloadTemplate>>,
}

impl WorkloadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a template by identity (pipeline step 1). `None` maps to
    /// `PipelineError::WorkloadNotFound` at the call site.
    pub fn get(&self, id: &WorkloadId) -> Option<WorkloadTemplate> {
        self.templates.read().get(id).cloned()
    }

    fn apply(&self, namespace: &str, resource: WorkloadTemplateResource) {
        let name = resource.metadata.name.clone().unwrap_or_default();
        let id = WorkloadId::new(namespace, name);
        let template = convert(&id, &resource);
        self.templates.write().insert(id, template);
    }

    fn remove(&self, namespace: &str, name: &str) {
        self.templates.write().remove(&WorkloadId::new(namespace, name));
    }

    /// Test-only seam so other modules' tests can populate a cache without
    /// a live watch stream.
    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, template: WorkloadTemplate) {
        self.templates.write().insert(template.id.clone(), template);
    }

    /// Drives the cache off a live watch stream until `cancel` fires. A
    /// `Restarted` event replaces the whole snapshot, matching
    /// `kube_runtime::watcher`'s relist-on-resync semantics.
    pub async fn run(
        self: Arc<Self>,
        namespace: String,
        mut events: impl futures::Stream<Item = Result<Event<WorkloadTemplateResource>, k8s_client::OrchestratorError>> + Unpin,
        cancel: CancellationToken,
    ) {
        use futures::StreamExt;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("workload cache watch shutting down");
                    return;
                }
                event = events.next() => {
                    match event {
                        Some(Ok(Event::Applied(resource))) => self.apply(&namespace, resource),
                        Some(Ok(Event::Deleted(resource))) => {
                            let name = resource.metadata.name.unwrap_or_default();
                            self.remove(&namespace, &name);
                        }
                        Some(Ok(Event::Restarted(resources))) => {
                            let mut fresh = HashMap::new();
                            for resource in resources {
                                let name = resource.metadata.name.clone().unwrap_or_default();
                                let id = WorkloadId::new(namespace.clone(), name);
                                let template = convert(&id, &resource);
                                fresh.insert(id, template);
                            }
                            *self.templates.write() = fresh;
                        }
                        Some(Err(error)) => tracing::warn!(%error, "workload template watch error"),
                        None => {
                            tracing::warn!("workload template watch stream ended");
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn convert(id: &WorkloadId, resource: &WorkloadTemplateResource) -> WorkloadTemplate {
    let spec = &resource.spec;
    let kind = if spec.kind.eq_ignore_ascii_case("interpreter") {
        WorkloadKind::Interpreter
    } else {
        WorkloadKind::Runtime
    };
    let auth_mode = if spec.auth_mode.eq_ignore_ascii_case("embedded-public-key") {
        WorkloadAuthMode::EmbeddedPublicKey
    } else {
        WorkloadAuthMode::None
    };
    WorkloadTemplate {
        id: id.clone(),
        kind,
        pod_shape: spec.pod_template.clone(),
        exposed_ports: spec
            .exposed_ports
            .iter()
            .map(|p| ExposedPort {
                port: p.port,
                protocol: p.protocol.parse().unwrap_or(Protocol::Http),
                path_prefix: p.path_prefix.clone(),
            })
            .collect(),
        session_ttl: spec.session_ttl_seconds.map(Duration::from_secs),
        idle_timeout: spec.idle_timeout_seconds.map(Duration::from_secs),
        warm_pool_size: spec.warm_pool_size,
        auth_mode,
        runtime_class: Some(spec.runtime_class.clone()),
    }
}
