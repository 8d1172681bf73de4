//! Core data model (spec §3): workload templates, session records, and the
//! small value types shared between them.

pub mod session;
pub mod workload;

pub use session::{EntryPoint, SessionKind, SessionRecord, SessionStatus};
pub use workload::{ExposedPort, Protocol, WorkloadAuthMode, WorkloadId, WorkloadKind, WorkloadTemplate};
