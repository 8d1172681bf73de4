//! `AuthGate` (spec §4.8): extracts the bearer token, validates it via
//! `TokenCache`, and binds the decomposed principal to the request. Every
//! request except `/health` goes through this.

use crate::{
    error::{AuthError, MalformedPrincipal, MissingBearer, Unauthenticated},
    identity::IdentityReviewer,
    token_cache::{Lookup, TokenCache},
};
use common_lib::Principal;
use snafu::{OptionExt, ResultExt};
use std::str::FromStr;
use std::sync::Arc;

/// What a successfully authenticated request carries forward: the raw
/// bearer token (needed by `ClientCache`/`ClientFactory` to build a
/// caller-scoped client) and the decomposed principal.
#[derive(Clone)]
pub struct AuthContext {
    pub token: String,
    pub principal: Principal,
}

pub struct AuthGate {
    token_cache: Arc<TokenCache>,
    reviewer: Arc<dyn IdentityReviewer>,
    /// Development-only bypass (spec §4.8: "bypassed entirely when auth is
    /// disabled by config").
    enabled: bool,
}

impl AuthGate {
    pub fn new(token_cache: Arc<TokenCache>, reviewer: Arc<dyn IdentityReviewer>, enabled: bool) -> Self {
        Self { token_cache, reviewer, enabled }
    }

    pub async fn authenticate(&self, authorization_header: Option<&str>) -> Result<AuthContext, AuthError> {
        if !self.enabled {
            return Ok(AuthContext {
                token: String::new(),
                principal: Principal::from_str("system:serviceaccount:default:dev").expect("literal is well-formed"),
            });
        }

        let token = authorization_header
            .and_then(|header| header.strip_prefix("Bearer "))
            .filter(|token| !token.is_empty())
            .context(MissingBearer)?;

        match self.token_cache.get(token) {
            Lookup::Hit { authenticated: false, .. } => Unauthenticated.fail(),
            Lookup::Hit { authenticated: true, principal: Some(principal) } => {
                Ok(AuthContext { token: token.to_string(), principal })
            }
            Lookup::Hit { authenticated: true, principal: None } => Unauthenticated.fail(),
            Lookup::Miss => self.review_and_cache(token).await,
        }
    }

    async fn review_and_cache(&self, token: &str) -> Result<AuthContext, AuthError> {
        let outcome = self.reviewer.review(token).await?;
        if !outcome.authenticated {
            self.token_cache.set(token.to_string(), false, None);
            return Unauthenticated.fail();
        }
        let subject = outcome.principal.unwrap_or_default();
        let principal = Principal::from_str(&subject).context(MalformedPrincipal)?;
        self.token_cache.set(token.to_string(), true, Some(principal.clone()));
        Ok(AuthContext { token: token.to_string(), principal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::identity::ReviewOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeReviewer {
        outcome: ReviewOutcome,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityReviewer for FakeReviewer {
        async fn review(&self, _token: &str) -> Result<ReviewOutcome, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ReviewOutcome {
                authenticated: self.outcome.authenticated,
                principal: self.outcome.principal.clone(),
            })
        }
    }

    fn gate(outcome: ReviewOutcome) -> (AuthGate, Arc<FakeReviewer>) {
        let reviewer = Arc::new(FakeReviewer { outcome, calls: AtomicUsize::new(0) });
        let gate = AuthGate::new(
            Arc::new(TokenCache::new(16, std::time::Duration::from_secs(300))),
            reviewer.clone(),
            true,
        );
        (gate, reviewer)
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let (gate, _) = gate(ReviewOutcome { authenticated: true, principal: Some("system:serviceaccount:default:sa".into()) });
        assert!(gate.authenticate(None).await.is_err());
    }

    #[tokio::test]
    async fn valid_token_resolves_principal() {
        let (gate, _) = gate(ReviewOutcome { authenticated: true, principal: Some("system:serviceaccount:default:sa".into()) });
        let ctx = gate.authenticate(Some("Bearer tok")).await.unwrap();
        assert_eq!(ctx.principal.namespace, "default");
    }

    #[tokio::test]
    async fn negative_result_short_circuits_on_second_call() {
        let (gate, reviewer) = gate(ReviewOutcome { authenticated: false, principal: None });
        assert!(gate.authenticate(Some("Bearer tok")).await.is_err());
        assert!(gate.authenticate(Some("Bearer tok")).await.is_err());
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), 1, "second call must hit TokenCache, not the reviewer");
    }

    #[tokio::test]
    async fn malformed_principal_is_rejected() {
        let (gate, _) = gate(ReviewOutcome { authenticated: true, principal: Some("not-a-principal".into()) });
        assert!(gate.authenticate(Some("Bearer tok")).await.is_err());
    }

    #[tokio::test]
    async fn disabled_gate_bypasses_everything() {
        let reviewer = Arc::new(FakeReviewer {
            outcome: ReviewOutcome { authenticated: false, principal: None },
            calls: AtomicUsize::new(0),
        });
        let gate = AuthGate::new(Arc::new(TokenCache::new(16, std::time::Duration::from_secs(300))), reviewer, false);
        assert!(gate.authenticate(None).await.is_ok());
    }
}
