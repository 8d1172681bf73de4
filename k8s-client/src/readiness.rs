//! The serving-readiness predicate (spec §4.7, §9 Open Question 3).
//!
//! Adopts the stricter variant: `Ready=True` AND
//! `reason=DependenciesReady`. Absence of the condition, `False`, or
//! `Unknown` all mean not ready.

use crate::crd::{SandboxStatus, READY_REASON_DEPENDENCIES_READY};

pub fn is_serving_ready(status: &SandboxStatus) -> bool {
    match status.condition("Ready") {
        Some(condition) => condition.status == "True" && condition.reason == READY_REASON_DEPENDENCIES_READY,
        None => false,
    }
}
