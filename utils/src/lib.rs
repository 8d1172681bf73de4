//! Ambient engineering shared by every binary in the workspace: version
//! info macros, structured-logging init, and the handful of constants and
//! default values `CliArgs` in `agent::server` binds flags/env-vars to.
//!
//! Kept deliberately small and dependency-light (no Kubernetes or store
//! types) so every crate in the workspace, including `k8s-client` and
//! `store`, can depend on it without a cycle.

pub mod tracing_telemetry;

/// Default bind address for the HTTP surface (spec §6 `--port`).
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
/// Default GC tick interval (spec §4.6).
pub const GC_INTERVAL: &str = "15s";
/// Default per-tick GC bound (spec §4.6).
pub const GC_TICK_TIMEOUT: &str = "2m";
/// Default idle-activity deadline fed to the GC's global cutoff (spec §9
/// Open Question 2: the global-default variant).
pub const DEFAULT_IDLE_THRESHOLD: &str = "15m";
/// Default absolute session TTL when a workload template does not declare
/// its own (spec §3 "optional absolute session TTL").
pub const DEFAULT_SESSION_TTL: &str = "1h";
/// Default bound on the creation pipeline's waiter-channel receive (spec
/// §4.5 step 6, §5).
pub const PIPELINE_WAIT_TIMEOUT: &str = "3m";
/// Default HTTP request timeout (spec §5).
pub const DEFAULT_REQUEST_TIMEOUT: &str = "30s";
/// Default LRU capacity for `TokenCache` and `ClientCache`.
pub const DEFAULT_CACHE_CAPACITY: &str = "4096";
/// Default `TokenCache` TTL (spec §4.1).
pub const DEFAULT_TOKEN_TTL: &str = "5m";
/// Default per-tick GC limit per index (spec §4.6).
pub const GC_LIMIT_PER_TICK: usize = 16;

/// Resolves the short git SHA at build time; falls back to "unknown" outside
/// a git checkout (e.g. in a source tarball), matching the teacher's
/// `git-version` usage in its own version macros. Requires the caller's
/// crate to also depend on `git_version` directly (macro-by-example does
/// not re-export another crate's macro through `$crate`).
#[macro_export]
macro_rules! git_version_str {
    () => {
        git_version::git_version!(fallback = "unknown", args = ["--abbrev=8", "--always"])
    };
}

/// Returns a short version string combining the crate version with the git
/// SHA baked in at build time.
#[macro_export]
macro_rules! version_info_str {
    () => {
        concat!(env!("CARGO_PKG_VERSION"), "-", $crate::git_version_str!())
    };
}

/// `"<name> <version>"`, used as the CLI parser's `name` field.
#[macro_export]
macro_rules! package_description {
    () => {
        concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
    };
}

/// Emits a single startup line naming the package and resolved version,
/// the same "first thing printed" convention every teacher binary follows.
#[macro_export]
macro_rules! print_package_info {
    () => {
        println!("{} ({})", $crate::package_description!(), $crate::version_info_str!());
    };
}
