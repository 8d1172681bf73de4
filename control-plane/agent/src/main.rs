mod auth;
mod client_cache;
mod client_factory;
mod error;
mod gc;
mod http;
mod identity;
mod jwt;
mod pipeline;
mod reconciler;
mod token_cache;
mod workload_cache;

use crate::{
    auth::AuthGate,
    client_cache::ClientCache,
    client_factory::ClientFactory,
    error::HttpError,
    gc::GarbageCollector,
    identity::KubeIdentityReviewer,
    jwt::SigningKey,
    pipeline::CreationPipeline,
    reconciler::{SandboxReconciler, WaiterMap},
    token_cache::TokenCache,
    workload_cache::WorkloadCache,
};
use actix_web::{web, App, HttpServer};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use opentelemetry::KeyValue;
use std::sync::Arc;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, StructOpt)]
#[structopt(name = utils::package_description!(), version = utils::version_info_str!())]
struct CliArgs {
    /// Bind address/port for the HTTP surface (spec §6 `--port`).
    #[structopt(long, default_value = "8080")]
    port: u16,

    /// Terminate TLS at this process rather than relying on an in-cluster
    /// proxy (spec §6 `--enable-tls`).
    #[structopt(long)]
    enable_tls: bool,

    /// PEM certificate chain, required when `--enable-tls` is set.
    #[structopt(long)]
    tls_cert: Option<String>,

    /// PEM private key, required when `--enable-tls` is set.
    #[structopt(long)]
    tls_key: Option<String>,

    /// actix-web worker concurrency bound.
    #[structopt(long, default_value = "256")]
    max_concurrent_requests: usize,

    /// Per-request timeout applied to the creation pipeline's bounded waits.
    #[structopt(long, default_value = utils::DEFAULT_REQUEST_TIMEOUT)]
    request_timeout: humantime::Duration,

    /// Bound on the pipeline's wait for the reconciler's `Ready` event.
    #[structopt(long, default_value = utils::PIPELINE_WAIT_TIMEOUT)]
    pipeline_wait_timeout: humantime::Duration,

    /// The namespace this process watches `Sandbox`/`WorkloadTemplate`
    /// objects in (`AGENTCUBE_NAMESPACE`).
    #[structopt(long, env = "AGENTCUBE_NAMESPACE", default_value = "default")]
    agentcube_namespace: String,

    /// Redis connection string (`STORE_ADDR`).
    #[structopt(long, env = "STORE_ADDR", default_value = "redis://localhost:6379")]
    store_addr: String,

    /// Redis password, if any (`STORE_PASSWORD`).
    #[structopt(long, env = "STORE_PASSWORD")]
    store_password: Option<String>,

    /// Forces a single-node Redis client instead of a cluster-aware one.
    /// Accepted for interface parity with the orchestrator's own store
    /// flags; this process only ever speaks to a single Redis endpoint.
    #[structopt(long, env = "STORE_FORCE_SINGLE")]
    store_force_single: bool,

    /// Bypasses `ClientCache`/`TokenCache` entirely, useful for local
    /// debugging against a live Redis without warming caches.
    #[structopt(long, env = "STORE_DISABLE_CACHE")]
    store_disable_cache: bool,

    /// Namespace holding the RS256 signing-key secret (`JWT_KEY_SECRET_NAMESPACE`).
    #[structopt(long, env = "JWT_KEY_SECRET_NAMESPACE")]
    jwt_key_secret_namespace: Option<String>,

    /// Name of the Secret object carrying the signing key.
    #[structopt(long, env = "ROUTER_IDENTITY_SECRET_NAME", default_value = "agentcube-router-identity")]
    router_identity_secret_name: String,

    /// Key within the Secret's data map holding the PEM-encoded RSA key.
    #[structopt(long, env = "ROUTER_IDENTITY_SECRET_KEY", default_value = "tls.key")]
    router_identity_secret_key: String,

    /// Disables `AuthGate` entirely; for local development only.
    #[structopt(long)]
    disable_auth: bool,

    #[structopt(long, default_value = utils::GC_INTERVAL)]
    gc_interval: humantime::Duration,

    #[structopt(long, default_value = utils::GC_TICK_TIMEOUT)]
    gc_tick_timeout: humantime::Duration,

    #[structopt(long, default_value = utils::DEFAULT_IDLE_THRESHOLD)]
    idle_threshold: humantime::Duration,

    #[structopt(long, default_value = utils::DEFAULT_SESSION_TTL)]
    default_session_ttl: humantime::Duration,

    #[structopt(long, default_value = utils::DEFAULT_CACHE_CAPACITY)]
    cache_capacity: usize,

    #[structopt(long, default_value = utils::DEFAULT_TOKEN_TTL)]
    token_cache_ttl: humantime::Duration,

    /// Add process service tags to the traces.
    #[structopt(long, env = "TRACING_TAGS", value_delimiter = ",", parse(try_from_str = utils::tracing_telemetry::parse_key_value))]
    tracing_tags: Vec<KeyValue>,

    /// Trace requests to the Jaeger endpoint agent.
    #[structopt(long)]
    jaeger: Option<String>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli_args = CliArgs::from_args();
    utils::print_package_info!();
    utils::tracing_telemetry::init_tracing("agentcube-core", cli_args.tracing_tags.clone(), cli_args.jaeger.clone());

    match run(cli_args).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "fatal startup error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli_args: CliArgs) -> Result<(), anyhow::Error> {
    let base_config = kube::Config::infer().await?;
    let controller_client = Client::try_from(base_config.clone())?;

    let store: Arc<dyn store::SessionStore> = Arc::new(
        store::RedisStore::connect(&cli_args.store_addr, cli_args.store_password.as_deref()).await?,
    );

    let signing_key = match &cli_args.jwt_key_secret_namespace {
        Some(namespace) => {
            let secrets: Api<Secret> = Api::namespaced(controller_client.clone(), namespace);
            let secret = secrets.get(&cli_args.router_identity_secret_name).await?;
            let pem = secret
                .data
                .and_then(|mut data| data.remove(&cli_args.router_identity_secret_key))
                .ok_or_else(|| anyhow::anyhow!("secret '{}' has no key '{}'", cli_args.router_identity_secret_name, cli_args.router_identity_secret_key))?;
            Some(Arc::new(SigningKey::from_rsa_pem(&pem.0)?))
        }
        None => {
            tracing::warn!("no JWT_KEY_SECRET_NAMESPACE configured; code-interpreter /init calls will carry an unsigned token");
            None
        }
    };

    let token_cache = Arc::new(TokenCache::new(cli_args.cache_capacity, cli_args.token_cache_ttl.into()));
    let client_cache = Arc::new(ClientCache::new(cli_args.cache_capacity));
    let client_factory = ClientFactory::new(base_config);
    let waiters = Arc::new(WaiterMap::new());
    let workloads = Arc::new(WorkloadCache::new());
    let reviewer: Arc<dyn identity::IdentityReviewer> = Arc::new(KubeIdentityReviewer::new(controller_client.clone()));
    let auth_gate = Arc::new(AuthGate::new(token_cache, reviewer, !cli_args.disable_auth));

    let pipeline = Arc::new(CreationPipeline::new(
        workloads.clone(),
        client_cache.clone(),
        client_factory,
        waiters.clone(),
        store.clone(),
        signing_key,
        cli_args.pipeline_wait_timeout.into(),
        chrono::Duration::from_std(cli_args.default_session_ttl.into())?,
        cli_args.request_timeout.into(),
    ));

    let controller_orchestrator: Arc<dyn k8s_client::OrchestratorClient> =
        Arc::new(k8s_client::KubeOrchestratorClient::new(controller_client.clone()));
    let gc = Arc::new(GarbageCollector::new(
        store,
        controller_orchestrator.clone(),
        cli_args.gc_interval.into(),
        cli_args.gc_tick_timeout.into(),
        chrono::Duration::from_std(cli_args.idle_threshold.into())?,
        utils::GC_LIMIT_PER_TICK,
    ));

    let cancel = CancellationToken::new();

    let reconciler = Arc::new(SandboxReconciler::new(waiters));
    let sandbox_events = k8s_client::watch_sandboxes(controller_client.clone(), &cli_args.agentcube_namespace);
    tokio::spawn(reconciler.run(Box::pin(sandbox_events), controller_orchestrator, cancel.child_token()));

    let template_events = k8s_client::watch_workload_templates(controller_client, &cli_args.agentcube_namespace);
    tokio::spawn(workloads.run(cli_args.agentcube_namespace.clone(), Box::pin(template_events), cancel.child_token()));

    tokio::spawn(gc.run(cancel.child_token()));

    let bind_addr = format!("0.0.0.0:{}", cli_args.port);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(actix_web_opentelemetry::RequestTracing::new())
            .app_data(web::Data::new(auth_gate.clone()))
            .app_data(web::Data::new(pipeline.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                actix_web::Error::from(HttpError::Validation { message: err.to_string() })
            }))
            .service(http::health)
            .service(http::create_agent_runtime)
            .service(http::create_code_interpreter)
            .service(http::delete_agent_runtime_session)
            .service(http::delete_code_interpreter_session)
    })
    .workers(cli_args.max_concurrent_requests.max(1).min(num_cpus()));

    let server = if cli_args.enable_tls {
        let tls_config = build_rustls_config(
            cli_args.tls_cert.as_deref().ok_or_else(|| anyhow::anyhow!("--tls-cert is required with --enable-tls"))?,
            cli_args.tls_key.as_deref().ok_or_else(|| anyhow::anyhow!("--tls-key is required with --enable-tls"))?,
        )?;
        server.bind_rustls(bind_addr, tls_config)?
    } else {
        server.bind(bind_addr)?
    };

    let shutdown = shutdown_signal(cancel);
    tokio::select! {
        result = server.run() => result?,
        _ = shutdown => {}
    }
    utils::tracing_telemetry::flush_tracing();
    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

fn build_rustls_config(cert_path: &str, key_path: &str) -> Result<rustls::ServerConfig, anyhow::Error> {
    let cert_file = &mut std::io::BufReader::new(std::fs::File::open(cert_path)?);
    let key_file = &mut std::io::BufReader::new(std::fs::File::open(key_path)?);
    let cert_chain = rustls_pemfile::certs(cert_file)?
        .into_iter()
        .map(rustls::Certificate)
        .collect();
    let mut keys: Vec<_> = rustls_pemfile::pkcs8_private_keys(key_file)?
        .into_iter()
        .map(rustls::PrivateKey)
        .collect();
    let key = keys.pop().ok_or_else(|| anyhow::anyhow!("no private key found in '{}'", key_path))?;
    let config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)?;
    Ok(config)
}

/// SIGTERM/SIGINT handling, generalized from `jsongrpc/src/service.rs::shutdown_signal`'s
/// single-consumer oneshot to a `CancellationToken` so the GC loop, the
/// reconciler's watch loop, and the workload cache's watch loop all observe
/// the same shutdown signal alongside the HTTP server.
async fn shutdown_signal(cancel: CancellationToken) {
    let mut signal_term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    let mut signal_int = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("failed to install SIGINT handler");
    tokio::select! {
        _ = signal_term.recv() => tracing::info!("SIGTERM received"),
        _ = signal_int.recv() => tracing::info!("SIGINT received"),
    }
    cancel.cancel();
}
