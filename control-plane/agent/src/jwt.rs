//! Two unrelated uses of `jsonwebtoken` that happen to share a dependency
//! (spec §4.2 token-expiry parsing, §4.5 step 8 RS256 signing):
//!
//! 1. `token_expiry` reads the `exp` claim out of the caller's bearer token
//!    *without* verifying its signature -- the orchestrator's identity
//!    review API already verified it before `AuthGate` cached the result
//!    (spec §4.8); this is purely about knowing when `ClientCache` should
//!    stop trusting the cached client.
//! 2. `InitClaims`/`sign_init_token` produce the short-lived RS256 token the
//!    pipeline POSTs to an interpreter sandbox's `/init` endpoint, signed by
//!    the process-wide keypair loaded at startup from `JWT_KEY_SECRET_NAMESPACE`.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

/// Unverified claim shape used only to pull `exp` out of an already-trusted
/// token. Every other field is ignored.
#[derive(Deserialize)]
struct ExpOnlyClaims {
    exp: i64,
}

/// The token's embedded expiry, or `None` if the token can't be parsed as a
/// JWT at all. Per spec §4.2, an unparseable token produces a *zero* expiry
/// which disables expiry-based eviction (trusted-forever until the LRU
/// evicts it); callers should map `None` to that "zero" sentinel rather
/// than treating it as an error.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    jsonwebtoken::dangerous_insecure_decode::<ExpOnlyClaims>(token)
        .ok()
        .map(|data| Utc.timestamp(data.claims.exp, 0))
}

#[derive(Debug, Snafu)]
pub enum SignError {
    #[snafu(display("failed to sign init token: {}", source))]
    Sign { source: jsonwebtoken::errors::Error },
}

/// Claims for the short-lived bearer token POSTed to `/init` (spec §4.5
/// step 8): session identity, the purpose of the call, and -- when the
/// template carries a session public key -- that key, so the sandbox can
/// pin trust to this specific session.
#[derive(Serialize)]
pub struct InitClaims {
    pub session_id: String,
    pub purpose: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_public_key: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl InitClaims {
    pub fn new(session_id: String, session_public_key: Option<String>, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            purpose: "sandbox-init",
            session_public_key,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }
}

/// Process-wide keypair used to sign `/init` tokens, loaded once at startup
/// from the `JWT_KEY_SECRET_NAMESPACE` secret (spec §6 env vars).
pub struct SigningKey {
    encoding_key: EncodingKey,
}

impl SigningKey {
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, SignError> {
        let encoding_key = EncodingKey::from_rsa_pem(pem).context(Sign)?;
        Ok(Self { encoding_key })
    }

    pub fn sign(&self, claims: &InitClaims) -> Result<String, SignError> {
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &self.encoding_key).context(Sign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_token_has_no_expiry() {
        assert_eq!(token_expiry("not-a-jwt"), None);
    }
}
