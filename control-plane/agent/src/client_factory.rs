//! Builds an identity-scoped `OrchestratorClient` (spec §4.2, §9 "Identity-
//! scoped clients"): every request must act under the caller's own bearer
//! token, never the controller's own service-account identity. Client
//! construction (TLS handshake, kubeconfig resolution) is the expensive part
//! `ClientCache` exists to amortise.

use k8s_client::{KubeOrchestratorClient, OrchestratorClient};
use kube::{Client, Config};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum ClientFactoryError {
    #[snafu(display("failed to build a scoped kube client: {}", source))]
    Build { source: kube::Error },
}

/// Builds one `kube::Client` per request, replacing the ambient in-cluster
/// service-account token with the caller's own. The base `Config` (cluster
/// URL, root CA) is resolved once at startup and cloned per call.
#[derive(Clone)]
pub struct ClientFactory {
    base_config: Config,
}

impl ClientFactory {
    pub fn new(base_config: Config) -> Self {
        Self { base_config }
    }

    /// Builds a fresh `Arc<dyn OrchestratorClient>` scoped to `token`. The
    /// result is what `ClientCache::set` stores under `(namespace,
    /// principal)`.
    pub fn build(&self, token: &str) -> Result<Arc<dyn OrchestratorClient>, ClientFactoryError> {
        let mut config = self.base_config.clone();
        config.auth_info.token = Some(token.to_string().into());
        config.auth_info.token_file = None;
        config.auth_info.exec = None;
        config.auth_info.username = None;
        config.auth_info.password = None;
        let client = Client::try_from(config).context(Build)?;
        Ok(Arc::new(KubeOrchestratorClient::new(client)))
    }
}
