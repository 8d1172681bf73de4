//! `CreationPipeline` (spec §4.5): the heart of the system. End-to-end
//! create -- register waiter, write placeholder, create the declarative
//! object(s), wait for readiness, resolve endpoints, commit -- with
//! best-effort rollback on any failure from step 7 onward.

use crate::{
    client_cache::ClientCache,
    client_factory::ClientFactory,
    error::{DependencyMissing, PipelineError, SandboxInit, WaitTimeout, WorkloadNotFound},
    jwt::{InitClaims, SigningKey},
    reconciler::WaiterMap,
    workload_cache::WorkloadCache,
};
use chrono::Duration as ChronoDuration;
use common_lib::{
    types::{EntryPoint, SessionKind, SessionRecord, WorkloadId, WorkloadKind},
    Principal,
};
use k8s_client::{
    crd::{standard_labels, with_runtime_class, SandboxClaimSpec, SandboxSpec},
    pod_address, pod_owned_by_sandbox, pod_phase, OrchestratorClient, Sandbox, SandboxClaim,
};
use kube::api::ObjectMeta;
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use std::time::Duration;
use store::SessionStore;
use uuid::Uuid;

fn protocol_name(protocol: common_lib::types::Protocol) -> &'static str {
    match protocol {
        common_lib::types::Protocol::Http => "HTTP",
        common_lib::types::Protocol::Tcp => "TCP",
        common_lib::types::Protocol::Grpc => "GRPC",
    }
}

pub struct CreateRequest {
    pub namespace: String,
    pub name: String,
    pub public_key: Option<String>,
    pub token: String,
    pub principal: Principal,
}

pub struct CreateResponse {
    pub session_id: String,
    pub sandbox_id: String,
    pub sandbox_name: String,
    pub entry_points: Vec<EntryPoint>,
}

pub struct CreationPipeline {
    workloads: Arc<WorkloadCache>,
    client_cache: Arc<ClientCache<Arc<dyn OrchestratorClient>>>,
    client_factory: ClientFactory,
    waiters: Arc<WaiterMap>,
    store: Arc<dyn SessionStore>,
    signing_key: Option<Arc<SigningKey>>,
    http_client: reqwest::Client,
    wait_timeout: Duration,
    default_ttl: ChronoDuration,
}

impl CreationPipeline {
    pub fn new(
        workloads: Arc<WorkloadCache>,
        client_cache: Arc<ClientCache<Arc<dyn OrchestratorClient>>>,
        client_factory: ClientFactory,
        waiters: Arc<WaiterMap>,
        store: Arc<dyn SessionStore>,
        signing_key: Option<Arc<SigningKey>>,
        wait_timeout: Duration,
        default_ttl: ChronoDuration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            workloads,
            client_cache,
            client_factory,
            waiters,
            store,
            signing_key,
            http_client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            wait_timeout,
            default_ttl,
        }
    }

    fn scoped_client(&self, request: &CreateRequest) -> Result<Arc<dyn OrchestratorClient>, PipelineError> {
        let key = request.principal.cache_key(&request.namespace);
        if let Some(client) = self.client_cache.get(&key) {
            return Ok(client);
        }
        let client = self
            .client_factory
            .build(&request.token)
            .context(crate::error::ClientBuild)?;
        self.client_cache.set(key, &request.token, client.clone());
        Ok(client)
    }

    /// Steps 1-10 of spec §4.5.
    pub async fn create(&self, request: CreateRequest) -> Result<CreateResponse, PipelineError> {
        // Step 1: resolve template.
        let id = WorkloadId::new(request.namespace.clone(), request.name.clone());
        let template = self.workloads.get(&id).context(WorkloadNotFound { id: id.to_string() })?;

        // Step 2: build declarative objects.
        if template.requires_public_key() && request.public_key.is_none() {
            return DependencyMissing { id: id.to_string() }.fail();
        }
        let session_id = Uuid::new_v4().to_string();
        let sandbox_name = format!("{}-{}", request.name, &Uuid::new_v4().to_simple().to_string()[..8]);
        let now = chrono::Utc::now();
        let ttl = template
            .session_ttl
            .map(|d| ChronoDuration::from_std(d).unwrap_or(self.default_ttl))
            .unwrap_or(self.default_ttl);
        let labels = standard_labels(&session_id, &request.name, &sandbox_name);
        let sandbox = Sandbox {
            metadata: ObjectMeta {
                name: Some(sandbox_name.clone()),
                namespace: Some(request.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: SandboxSpec {
                pod_template: with_runtime_class(&template.pod_shape, template.normalized_runtime_class()),
                shutdown_time: now + ttl,
                replicas: 1,
            },
            status: None,
        };
        let claim_name = template.has_warm_pool().then(|| format!("{}-claim", sandbox_name));
        let claim = claim_name.as_ref().map(|claim_name| SandboxClaim {
            metadata: ObjectMeta {
                name: Some(claim_name.clone()),
                namespace: Some(request.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: SandboxClaimSpec {
                template_name: request.name.clone(),
                session_id: session_id.clone(),
                sandbox_name: sandbox_name.clone(),
            },
        });
        let kind = match &claim_name {
            Some(claim_name) => SessionKind::ClaimBacked { claim_name: claim_name.clone() },
            None => SessionKind::Direct,
        };

        // Step 3: register the waiter *before* creating the object.
        let rx = self.waiters.watch_once(&request.namespace, &sandbox_name);

        // Step 4: write the placeholder.
        let mut record = SessionRecord::placeholder(
            session_id.clone(),
            kind,
            sandbox_name.clone(),
            sandbox_name.clone(),
            request.namespace.clone(),
            now,
            ttl,
            request.principal.clone(),
        );
        if let Err(source) = self.store.store(&record).await {
            self.waiters.unwatch(&request.namespace, &sandbox_name);
            return Err(PipelineError::PlaceholderWrite { source });
        }

        let client = match self.scoped_client(&request) {
            Ok(client) => client,
            Err(error) => {
                self.waiters.unwatch(&request.namespace, &sandbox_name);
                let _ = self.store.delete(&session_id).await;
                return Err(error);
            }
        };

        // Step 5: create the declarative object(s).
        if let Err(source) = client.create_sandbox(&request.namespace, &sandbox).await {
            self.waiters.unwatch(&request.namespace, &sandbox_name);
            let _ = self.store.delete(&session_id).await;
            return Err(PipelineError::ObjectCreate { source });
        }
        if let Some(claim) = &claim {
            if let Err(source) = client.create_claim(&request.namespace, claim).await {
                self.waiters.unwatch(&request.namespace, &sandbox_name);
                let _ = client.delete_sandbox(&request.namespace, &sandbox_name).await;
                let _ = self.store.delete(&session_id).await;
                return Err(PipelineError::ObjectCreate { source });
            }
        }

        // Step 6: wait for readiness.
        let ready = match tokio::time::timeout(self.wait_timeout, rx).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) | Err(_) => {
                self.waiters.unwatch(&request.namespace, &sandbox_name);
                return WaitTimeout {
                    namespace: request.namespace.clone(),
                    name: sandbox_name.clone(),
                }
                .fail();
                // The placeholder is intentionally left in place for GC
                // (spec §4.5 step 6).
            }
        };

        // Step 7: resolve endpoints.
        let entry_points = match self
            .resolve_entry_points(&client, &request.namespace, &sandbox_name, &template)
            .await
        {
            Ok(entry_points) => entry_points,
            Err(source) => {
                self.rollback(&client, &request.namespace, &sandbox_name, claim_name.as_deref()).await;
                let _ = self.store.delete(&session_id).await;
                return Err(PipelineError::EndpointResolve {
                    namespace: request.namespace.clone(),
                    name: sandbox_name.clone(),
                    source,
                });
            }
        };

        // Step 8 (interpreter kind only).
        if template.kind == WorkloadKind::Interpreter {
            if let Err(error) = self.post_init(&session_id, &entry_points, &request.public_key).await {
                self.rollback(&client, &request.namespace, &sandbox_name, claim_name.as_deref()).await;
                let _ = self.store.delete(&session_id).await;
                return Err(error);
            }
        }

        // Step 9: commit.
        record.commit(entry_points.clone());
        if let Err(source) = self.store.update(&record).await {
            self.rollback(&client, &request.namespace, &sandbox_name, claim_name.as_deref()).await;
            return Err(PipelineError::Commit { session_id, source });
        }

        // Step 10: success.
        let _ = ready; // the event's sandbox object isn't otherwise needed past readiness.
        Ok(CreateResponse {
            session_id,
            sandbox_id: sandbox_name.clone(),
            sandbox_name,
            entry_points,
        })
    }

    async fn resolve_entry_points(
        &self,
        client: &Arc<dyn OrchestratorClient>,
        namespace: &str,
        sandbox_name: &str,
        template: &common_lib::types::WorkloadTemplate,
    ) -> Result<Vec<EntryPoint>, k8s_client::OrchestratorError> {
        let pod = match client.get_pod(namespace, sandbox_name).await? {
            Some(pod) => pod,
            None => {
                let pods = client.list_pods_by_sandbox(namespace, sandbox_name).await?;
                pods.into_iter()
                    .find(|pod| pod_owned_by_sandbox(pod, sandbox_name))
                    .ok_or_else(|| k8s_client::OrchestratorError::NotOwned {
                        namespace: namespace.to_string(),
                        name: sandbox_name.to_string(),
                    })?
            }
        };
        let phase = pod_phase(&pod).unwrap_or_default();
        if phase != "Running" {
            return Err(k8s_client::OrchestratorError::NotRunning {
                namespace: namespace.to_string(),
                name: sandbox_name.to_string(),
                phase,
            });
        }
        let address = pod_address(&pod).ok_or_else(|| k8s_client::OrchestratorError::NoAddress {
            namespace: namespace.to_string(),
            name: sandbox_name.to_string(),
        })?;
        Ok(template
            .exposed_ports
            .iter()
            .map(|port| EntryPoint {
                path: port.path_prefix.clone(),
                protocol: protocol_name(port.protocol).to_string(),
                endpoint: format!("{}:{}", address, port.port),
            })
            .collect())
    }

    async fn post_init(
        &self,
        session_id: &str,
        entry_points: &[EntryPoint],
        public_key: &Option<String>,
    ) -> Result<(), PipelineError> {
        let entry_point = entry_points
            .first()
            .context(crate::error::NoEntryPoints { id: session_id.to_string() })?;
        let url = format!("http://{}/init", entry_point.endpoint);
        let claims = InitClaims::new(session_id.to_string(), public_key.clone(), ChronoDuration::minutes(5));
        let token = match &self.signing_key {
            Some(key) => key.sign(&claims).context(crate::error::InitTokenSign)?,
            None => String::new(),
        };
        self.http_client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "sessionId": session_id }))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .context(SandboxInit { endpoint: url })?;
        Ok(())
    }

    /// Best-effort rollback (spec §4.5): errors here are logged, never
    /// surfaced to the caller.
    async fn rollback(
        &self,
        client: &Arc<dyn OrchestratorClient>,
        namespace: &str,
        sandbox_name: &str,
        claim_name: Option<&str>,
    ) {
        if let Some(claim_name) = claim_name {
            if let Err(error) = client.delete_claim(namespace, claim_name).await {
                tracing::warn!(%error, namespace, claim_name, "rollback: failed to delete claim");
            }
        }
        if let Err(error) = client.delete_sandbox(namespace, sandbox_name).await {
            tracing::warn!(%error, namespace, sandbox_name, "rollback: failed to delete sandbox");
        }
    }

    /// Delete flow (spec §2 "Control flow of a delete"): AuthGate has
    /// already authenticated by the time this runs; this does the lookup,
    /// scoped delete, and store delete.
    pub async fn delete_session(
        &self,
        session_id: &str,
        token: &str,
        principal: &Principal,
    ) -> Result<(), PipelineError> {
        let record = self.store.get(session_id).await.map_err(|error| match error {
            store::StoreError::NotFound { .. } => {
                PipelineError::SessionNotFound { session_id: session_id.to_string() }
            }
            source => PipelineError::Lookup { session_id: session_id.to_string(), source },
        })?;

        let key = principal.cache_key(&record.sandbox_namespace);
        let client = match self.client_cache.get(&key) {
            Some(client) => client,
            None => {
                let client = self.client_factory.build(token).context(crate::error::ClientBuild)?;
                self.client_cache.set(key, token, client.clone());
                client
            }
        };

        match &record.kind {
            SessionKind::ClaimBacked { claim_name } => {
                client
                    .delete_claim(&record.sandbox_namespace, claim_name)
                    .await
                    .context(crate::error::Orchestrator)?;
            }
            SessionKind::Direct => {}
        }
        client
            .delete_sandbox(&record.sandbox_namespace, &record.sandbox_name)
            .await
            .context(crate::error::Orchestrator)?;
        self.store
            .delete(session_id)
            .await
            .map_err(|source| PipelineError::Commit { session_id: session_id.to_string(), source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::SandboxReconciler;
    use async_trait::async_trait;
    use chrono::Utc;
    use common_lib::types::{ExposedPort, Protocol, SessionStatus, WorkloadAuthMode, WorkloadTemplate};
    use k8s_client::{
        crd::{SandboxCondition, SandboxStatus as CrdSandboxStatus, READY_REASON_DEPENDENCIES_READY},
        OrchestratorError, SandboxEvent,
    };
    use k8s_openapi::api::core::v1::{Pod, PodStatus};
    use parking_lot::Mutex;
    use std::str::FromStr;
    use store::MemStore;

    fn caller() -> Principal {
        Principal::from_str("system:serviceaccount:default:caller").unwrap()
    }

    fn client_factory() -> ClientFactory {
        let url = "https://127.0.0.1:6443".parse::<http::Uri>().unwrap();
        ClientFactory::new(kube::Config::new(url))
    }

    fn runtime_template(
        name: &str,
        ports: Vec<ExposedPort>,
        auth_mode: WorkloadAuthMode,
        warm_pool_size: Option<u32>,
    ) -> WorkloadTemplate {
        WorkloadTemplate {
            id: WorkloadId::new("default", name),
            kind: WorkloadKind::Runtime,
            pod_shape: serde_json::json!({}),
            exposed_ports: ports,
            session_ttl: None,
            idle_timeout: None,
            warm_pool_size,
            auth_mode,
            runtime_class: None,
        }
    }

    fn running_pod(ip: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some(ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn kube_error() -> kube::Error {
        kube::Error::Service(Box::new(std::io::Error::new(std::io::ErrorKind::Other, "boom")))
    }

    /// Stands in for both the orchestrator and the reconciler's watch delivery:
    /// a successful `create_sandbox` immediately feeds a synthetic `Applied`
    /// event through the real `SandboxReconciler`, the same way a live watch
    /// stream would once the object exists.
    #[derive(Default)]
    struct FakeClientState {
        fail_create_sandbox: bool,
        fail_create_claim: bool,
        deliver_ready: bool,
        pod: Option<Pod>,
        sandbox_deletes: Vec<String>,
        claim_deletes: Vec<String>,
        claims_created: Vec<String>,
    }

    struct FakeClient {
        reconciler: Arc<SandboxReconciler>,
        state: Mutex<FakeClientState>,
    }

    impl FakeClient {
        fn new(reconciler: Arc<SandboxReconciler>) -> Self {
            Self { reconciler, state: Mutex::new(FakeClientState::default()) }
        }
    }

    #[async_trait]
    impl OrchestratorClient for FakeClient {
        async fn create_sandbox(&self, namespace: &str, sandbox: &Sandbox) -> Result<Sandbox, OrchestratorError> {
            let name = sandbox.metadata.name.clone().unwrap_or_default();
            let (fail, deliver_ready) = {
                let state = self.state.lock();
                (state.fail_create_sandbox, state.deliver_ready)
            };
            if fail {
                return Err(OrchestratorError::Transient { namespace: namespace.to_string(), name, source: kube_error() });
            }
            let mut created = sandbox.clone();
            if deliver_ready {
                created.status = Some(CrdSandboxStatus {
                    conditions: vec![SandboxCondition {
                        type_: "Ready".to_string(),
                        status: "True".to_string(),
                        reason: READY_REASON_DEPENDENCIES_READY.to_string(),
                        message: String::new(),
                    }],
                });
                self.reconciler.handle_event(SandboxEvent::Applied(created.clone()));
            }
            Ok(created)
        }

        async fn delete_sandbox(&self, _namespace: &str, name: &str) -> Result<(), OrchestratorError> {
            self.state.lock().sandbox_deletes.push(name.to_string());
            Ok(())
        }

        async fn get_sandbox(&self, _namespace: &str, _name: &str) -> Result<Sandbox, OrchestratorError> {
            unimplemented!()
        }

        async fn create_claim(&self, namespace: &str, claim: &SandboxClaim) -> Result<SandboxClaim, OrchestratorError> {
            let name = claim.metadata.name.clone().unwrap_or_default();
            if self.state.lock().fail_create_claim {
                return Err(OrchestratorError::Transient { namespace: namespace.to_string(), name, source: kube_error() });
            }
            self.state.lock().claims_created.push(name);
            Ok(claim.clone())
        }

        async fn delete_claim(&self, _namespace: &str, name: &str) -> Result<(), OrchestratorError> {
            self.state.lock().claim_deletes.push(name.to_string());
            Ok(())
        }

        async fn get_pod(&self, _namespace: &str, _name: &str) -> Result<Option<Pod>, OrchestratorError> {
            Ok(self.state.lock().pod.clone())
        }

        async fn list_pods_by_sandbox(&self, _namespace: &str, _sandbox_name: &str) -> Result<Vec<Pod>, OrchestratorError> {
            Ok(vec![])
        }
    }

    fn build_pipeline(
        workloads: Arc<WorkloadCache>,
        store: Arc<dyn SessionStore>,
        client_cache: Arc<ClientCache<Arc<dyn OrchestratorClient>>>,
        waiters: Arc<WaiterMap>,
    ) -> CreationPipeline {
        CreationPipeline::new(
            workloads,
            client_cache,
            client_factory(),
            waiters,
            store,
            None,
            Duration::from_millis(200),
            ChronoDuration::minutes(30),
            Duration::from_secs(5),
        )
    }

    /// Wires a `FakeClient` into `client_cache` under the key the pipeline
    /// will actually look up, so `scoped_client` hits the cache instead of
    /// trying to build a real `kube::Client`.
    fn seed_client(client_cache: &ClientCache<Arc<dyn OrchestratorClient>>, principal: &Principal, client: Arc<FakeClient>) {
        client_cache.set(principal.cache_key("default"), "garbage", client as Arc<dyn OrchestratorClient>);
    }

    #[tokio::test]
    async fn happy_path_create_resolves_entry_points_and_commits() {
        let workloads = Arc::new(WorkloadCache::new());
        workloads.insert_for_test(runtime_template(
            "wk1",
            vec![ExposedPort { port: 8080, protocol: Protocol::Http, path_prefix: "/".to_string() }],
            WorkloadAuthMode::None,
            None,
        ));
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let client_cache = Arc::new(ClientCache::new(8));
        let waiters = Arc::new(WaiterMap::new());
        let reconciler = Arc::new(SandboxReconciler::new(waiters.clone()));
        let client = Arc::new(FakeClient::new(reconciler));
        client.state.lock().deliver_ready = true;
        client.state.lock().pod = Some(running_pod("10.0.0.9"));

        let principal = caller();
        seed_client(&client_cache, &principal, client.clone());

        let pipeline = build_pipeline(workloads, store.clone(), client_cache, waiters);
        let response = pipeline
            .create(CreateRequest {
                namespace: "default".to_string(),
                name: "wk1".to_string(),
                public_key: None,
                token: "garbage".to_string(),
                principal: principal.clone(),
            })
            .await
            .expect("create should succeed");

        assert_eq!(
            response.entry_points,
            vec![EntryPoint { path: "/".to_string(), protocol: "HTTP".to_string(), endpoint: "10.0.0.9:8080".to_string() }]
        );
        let record = store.get(&response.session_id).await.unwrap();
        assert_eq!(record.status, SessionStatus::Running);
        assert_eq!(record.kind, SessionKind::Direct);
        assert_eq!(record.sandbox_name, response.sandbox_name);
    }

    #[tokio::test]
    async fn unknown_workload_is_rejected_before_touching_the_store() {
        let workloads = Arc::new(WorkloadCache::new());
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let client_cache = Arc::new(ClientCache::new(8));
        let waiters = Arc::new(WaiterMap::new());
        let pipeline = build_pipeline(workloads, store, client_cache, waiters);

        let error = pipeline
            .create(CreateRequest {
                namespace: "default".to_string(),
                name: "missing".to_string(),
                public_key: None,
                token: "garbage".to_string(),
                principal: caller(),
            })
            .await
            .expect_err("unknown workload must be rejected");
        assert!(matches!(error, PipelineError::WorkloadNotFound { .. }));
    }

    #[tokio::test]
    async fn dependency_missing_without_public_key_short_circuits_before_any_object_create() {
        let workloads = Arc::new(WorkloadCache::new());
        workloads.insert_for_test(runtime_template(
            "wk1",
            vec![ExposedPort { port: 8080, protocol: Protocol::Http, path_prefix: "/".to_string() }],
            WorkloadAuthMode::EmbeddedPublicKey,
            None,
        ));
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let client_cache = Arc::new(ClientCache::new(8));
        let waiters = Arc::new(WaiterMap::new());
        let pipeline = build_pipeline(workloads, store, client_cache, waiters);

        let error = pipeline
            .create(CreateRequest {
                namespace: "default".to_string(),
                name: "wk1".to_string(),
                public_key: None,
                token: "garbage".to_string(),
                principal: caller(),
            })
            .await
            .expect_err("missing public key must be rejected");
        assert!(matches!(error, PipelineError::DependencyMissing { .. }));
    }

    #[tokio::test]
    async fn object_create_failure_rolls_back_the_placeholder() {
        let workloads = Arc::new(WorkloadCache::new());
        workloads.insert_for_test(runtime_template(
            "wk1",
            vec![ExposedPort { port: 8080, protocol: Protocol::Http, path_prefix: "/".to_string() }],
            WorkloadAuthMode::None,
            None,
        ));
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let client_cache = Arc::new(ClientCache::new(8));
        let waiters = Arc::new(WaiterMap::new());
        let reconciler = Arc::new(SandboxReconciler::new(waiters.clone()));
        let client = Arc::new(FakeClient::new(reconciler));
        client.state.lock().fail_create_sandbox = true;

        let principal = caller();
        seed_client(&client_cache, &principal, client.clone());

        let pipeline = build_pipeline(workloads, store.clone(), client_cache, waiters);
        let error = pipeline
            .create(CreateRequest {
                namespace: "default".to_string(),
                name: "wk1".to_string(),
                public_key: None,
                token: "garbage".to_string(),
                principal,
            })
            .await
            .expect_err("create should fail when the orchestrator rejects the object");
        assert!(matches!(error, PipelineError::ObjectCreate { .. }));

        let remaining = store.list_expired(Utc::now() + ChronoDuration::days(1), 16).await.unwrap();
        assert!(remaining.is_empty(), "a failed object create must not leave a placeholder behind");
    }

    #[tokio::test]
    async fn wait_timeout_leaves_the_placeholder_for_gc() {
        let workloads = Arc::new(WorkloadCache::new());
        workloads.insert_for_test(runtime_template(
            "wk1",
            vec![ExposedPort { port: 8080, protocol: Protocol::Http, path_prefix: "/".to_string() }],
            WorkloadAuthMode::None,
            None,
        ));
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let client_cache = Arc::new(ClientCache::new(8));
        let waiters = Arc::new(WaiterMap::new());
        let reconciler = Arc::new(SandboxReconciler::new(waiters.clone()));
        // deliver_ready stays false: create_sandbox succeeds but no Ready event ever arrives.
        let client = Arc::new(FakeClient::new(reconciler));

        let principal = caller();
        seed_client(&client_cache, &principal, client.clone());

        let pipeline = build_pipeline(workloads, store.clone(), client_cache, waiters);
        let error = pipeline
            .create(CreateRequest {
                namespace: "default".to_string(),
                name: "wk1".to_string(),
                public_key: None,
                token: "garbage".to_string(),
                principal,
            })
            .await
            .expect_err("a sandbox that never becomes ready must time out");
        assert!(matches!(error, PipelineError::WaitTimeout { .. }));

        let remaining = store.list_expired(Utc::now() + ChronoDuration::days(1), 16).await.unwrap();
        assert_eq!(remaining.len(), 1, "the placeholder is left in place for GC, not rolled back");
    }

    #[tokio::test]
    async fn endpoint_resolve_failure_rolls_back_the_sandbox() {
        let workloads = Arc::new(WorkloadCache::new());
        workloads.insert_for_test(runtime_template(
            "wk1",
            vec![ExposedPort { port: 8080, protocol: Protocol::Http, path_prefix: "/".to_string() }],
            WorkloadAuthMode::None,
            None,
        ));
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let client_cache = Arc::new(ClientCache::new(8));
        let waiters = Arc::new(WaiterMap::new());
        let reconciler = Arc::new(SandboxReconciler::new(waiters.clone()));
        let client = Arc::new(FakeClient::new(reconciler));
        client.state.lock().deliver_ready = true; // ready, but no pod ever shows up

        let principal = caller();
        seed_client(&client_cache, &principal, client.clone());

        let pipeline = build_pipeline(workloads, store.clone(), client_cache, waiters);
        let error = pipeline
            .create(CreateRequest {
                namespace: "default".to_string(),
                name: "wk1".to_string(),
                public_key: None,
                token: "garbage".to_string(),
                principal,
            })
            .await
            .expect_err("an unresolvable pod must fail the create");
        assert!(matches!(error, PipelineError::EndpointResolve { .. }));
        assert_eq!(client.state.lock().sandbox_deletes.len(), 1, "rollback must delete the sandbox it created");

        let remaining = store.list_expired(Utc::now() + ChronoDuration::days(1), 16).await.unwrap();
        assert!(remaining.is_empty(), "rollback must also clear the placeholder");
    }

    #[tokio::test]
    async fn warm_pool_template_creates_a_claim_alongside_the_sandbox() {
        let workloads = Arc::new(WorkloadCache::new());
        workloads.insert_for_test(runtime_template(
            "wk1",
            vec![ExposedPort { port: 8080, protocol: Protocol::Http, path_prefix: "/".to_string() }],
            WorkloadAuthMode::None,
            Some(2),
        ));
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let client_cache = Arc::new(ClientCache::new(8));
        let waiters = Arc::new(WaiterMap::new());
        let reconciler = Arc::new(SandboxReconciler::new(waiters.clone()));
        let client = Arc::new(FakeClient::new(reconciler));
        client.state.lock().deliver_ready = true;
        client.state.lock().pod = Some(running_pod("10.0.0.9"));

        let principal = caller();
        seed_client(&client_cache, &principal, client.clone());

        let pipeline = build_pipeline(workloads, store.clone(), client_cache, waiters);
        let response = pipeline
            .create(CreateRequest {
                namespace: "default".to_string(),
                name: "wk1".to_string(),
                public_key: None,
                token: "garbage".to_string(),
                principal,
            })
            .await
            .expect("create should succeed");

        assert_eq!(client.state.lock().claims_created.len(), 1);
        let record = store.get(&response.session_id).await.unwrap();
        assert!(matches!(record.kind, SessionKind::ClaimBacked { .. }));
    }

    #[tokio::test]
    async fn delete_session_for_claim_backed_session_deletes_claim_then_sandbox_then_store() {
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let waiters = Arc::new(WaiterMap::new());
        let reconciler = Arc::new(SandboxReconciler::new(waiters.clone()));
        let client = Arc::new(FakeClient::new(reconciler));
        let client_cache = Arc::new(ClientCache::new(8));
        let principal = caller();
        seed_client(&client_cache, &principal, client.clone());

        let record = SessionRecord {
            kind: SessionKind::ClaimBacked { claim_name: "wk1-sbx-claim".to_string() },
            sandbox_id: "wk1-sbx".to_string(),
            sandbox_name: "wk1-sbx".to_string(),
            sandbox_namespace: "default".to_string(),
            session_id: "sess-1".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
            last_activity: Utc::now(),
            entry_points: vec![],
            status: SessionStatus::Running,
            creator_principal: principal.clone(),
        };
        store.store(&record).await.unwrap();

        let workloads = Arc::new(WorkloadCache::new());
        let pipeline = build_pipeline(workloads, store.clone(), client_cache, waiters);
        pipeline.delete_session("sess-1", "garbage", &principal).await.unwrap();

        assert_eq!(client.state.lock().claim_deletes, vec!["wk1-sbx-claim".to_string()]);
        assert_eq!(client.state.lock().sandbox_deletes, vec!["wk1-sbx".to_string()]);
        assert!(store.get("sess-1").await.is_err());
    }

    #[tokio::test]
    async fn delete_session_for_direct_kind_never_deletes_a_claim() {
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let waiters = Arc::new(WaiterMap::new());
        let reconciler = Arc::new(SandboxReconciler::new(waiters.clone()));
        let client = Arc::new(FakeClient::new(reconciler));
        let client_cache = Arc::new(ClientCache::new(8));
        let principal = caller();
        seed_client(&client_cache, &principal, client.clone());

        let record = SessionRecord {
            kind: SessionKind::Direct,
            sandbox_id: "wk1-sbx".to_string(),
            sandbox_name: "wk1-sbx".to_string(),
            sandbox_namespace: "default".to_string(),
            session_id: "sess-2".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
            last_activity: Utc::now(),
            entry_points: vec![],
            status: SessionStatus::Running,
            creator_principal: principal.clone(),
        };
        store.store(&record).await.unwrap();

        let workloads = Arc::new(WorkloadCache::new());
        let pipeline = build_pipeline(workloads, store.clone(), client_cache, waiters);
        pipeline.delete_session("sess-2", "garbage", &principal).await.unwrap();

        assert!(client.state.lock().claim_deletes.is_empty());
        assert_eq!(client.state.lock().sandbox_deletes, vec!["wk1-sbx".to_string()]);
    }

    #[tokio::test]
    async fn delete_session_for_unknown_id_returns_session_not_found() {
        let store: Arc<dyn SessionStore> = Arc::new(MemStore::new());
        let waiters = Arc::new(WaiterMap::new());
        let client_cache = Arc::new(ClientCache::new(8));
        let workloads = Arc::new(WorkloadCache::new());
        let pipeline = build_pipeline(workloads, store, client_cache, waiters);

        let error = pipeline.delete_session("missing", "garbage", &caller()).await.unwrap_err();
        assert!(matches!(error, PipelineError::SessionNotFound { .. }));
    }

    /// A `SessionStore` whose `get` always returns a backend failure, for
    /// distinguishing "lookup blew up" from "lookup found nothing".
    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn store(&self, _record: &SessionRecord) -> Result<(), store::StoreError> {
            unimplemented!()
        }
        async fn update(&self, _record: &SessionRecord) -> Result<(), store::StoreError> {
            unimplemented!()
        }
        async fn get(&self, session_id: &str) -> Result<SessionRecord, store::StoreError> {
            Err(store::StoreError::Deserialise {
                session_id: session_id.to_string(),
                source: serde_json::from_str::<SessionRecord>("not json").unwrap_err(),
            })
        }
        async fn delete(&self, _session_id: &str) -> Result<(), store::StoreError> {
            unimplemented!()
        }
        async fn list_expired(
            &self,
            _before: chrono::DateTime<Utc>,
            _limit: usize,
        ) -> Result<Vec<SessionRecord>, store::StoreError> {
            unimplemented!()
        }
        async fn list_inactive(
            &self,
            _before: chrono::DateTime<Utc>,
            _limit: usize,
        ) -> Result<Vec<SessionRecord>, store::StoreError> {
            unimplemented!()
        }
        async fn touch_activity(&self, _session_id: &str, _at: chrono::DateTime<Utc>) -> Result<(), store::StoreError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn delete_session_for_backend_failure_is_not_reported_as_not_found() {
        let store: Arc<dyn SessionStore> = Arc::new(FailingStore);
        let waiters = Arc::new(WaiterMap::new());
        let client_cache = Arc::new(ClientCache::new(8));
        let workloads = Arc::new(WorkloadCache::new());
        let pipeline = build_pipeline(workloads, store, client_cache, waiters);

        let error = pipeline.delete_session("sess-1", "garbage", &caller()).await.unwrap_err();
        assert!(matches!(error, PipelineError::Lookup { .. }));
        assert_eq!(error.code(), common_lib::ErrorCode::Internal);
    }
}
