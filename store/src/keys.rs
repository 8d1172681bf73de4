//! Key layout per the wire contract (spec §6):
//! `session:<id>`, sorted set `sandbox:expiry`, sorted set `sandbox:last_activity`.

pub const EXPIRY_INDEX: &str = "sandbox:expiry";
pub const ACTIVITY_INDEX: &str = "sandbox:last_activity";

pub fn primary_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}
