//! Structured logging / tracing init, shared by every binary.
//!
//! `RUST_LOG`-driven filtering via `tracing_subscriber::EnvFilter`, with an
//! optional Jaeger exporter layered on top when a `--jaeger` endpoint is
//! given -- the same opt-in telemetry shape as the teacher's
//! `utils::tracing_telemetry::init_tracing`.

use opentelemetry::{sdk::Resource, KeyValue};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialises the global `tracing` subscriber for `service_name`.
///
/// Always installs an `EnvFilter` (default `info`) plus a formatting layer.
/// When `jaeger` is `Some`, also installs an OpenTelemetry/Jaeger pipeline
/// tagged with `tags` so traces from this process are attributable in a
/// shared collector.
pub fn init_tracing(service_name: &'static str, tags: Vec<KeyValue>, jaeger: Option<String>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match jaeger {
        Some(endpoint) => {
            let tracer = opentelemetry_jaeger::new_pipeline()
                .with_agent_endpoint(endpoint)
                .with_service_name(service_name)
                .with_trace_config(
                    opentelemetry::sdk::trace::config()
                        .with_resource(Resource::new(tags)),
                )
                .install_batch(opentelemetry::runtime::TokioCurrentThread)
                .expect("failed to install the Jaeger pipeline");
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init();
        }
        None => registry.init(),
    }
}

/// Parses a single `key=value` pair, used by `--tracing-tags` (`structopt`'s
/// `parse(try_from_str = ...)`).
pub fn parse_key_value(src: &str) -> Result<KeyValue, String> {
    let (key, value) = src
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", src))?;
    Ok(KeyValue::new(key.to_string(), value.to_string()))
}

/// The default resource tags stamped onto every trace from this process:
/// package name and version, plus anything the git SHA macro resolved.
pub fn default_tracing_tags(git_version: &str, cargo_version: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::new("git.version", git_version.to_string()),
        KeyValue::new("package.version", cargo_version.to_string()),
    ]
}

/// Flushes any pending OpenTelemetry spans. Call on shutdown so the final
/// request's trace isn't dropped when the process exits.
pub fn flush_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
