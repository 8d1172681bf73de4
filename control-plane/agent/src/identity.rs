//! The orchestrator's identity-review API (spec §4.8, §6): a thin wrapper
//! over the Kubernetes `authentication.k8s.io/v1` `TokenReview` API, which
//! is exactly the "external collaborator" spec §4.8 refers to.

use crate::error::{AuthError, ReviewFailed};
use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use kube::{api::PostParams, Api, Client};
use snafu::ResultExt;

/// Outcome of reviewing a bearer token: whether it authenticated, and if
/// so, the raw `system:serviceaccount:<ns>:<name>` subject string.
pub struct ReviewOutcome {
    pub authenticated: bool,
    pub principal: Option<String>,
}

#[async_trait]
pub trait IdentityReviewer: Send + Sync {
    async fn review(&self, token: &str) -> Result<ReviewOutcome, AuthError>;
}

/// Production implementation, using the controller's own cluster-scoped
/// client -- `TokenReview` is itself a privileged API, unlike everything
/// else in this repo which acts as the caller.
pub struct KubeIdentityReviewer {
    client: Client,
}

impl KubeIdentityReviewer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityReviewer for KubeIdentityReviewer {
    async fn review(&self, token: &str) -> Result<ReviewOutcome, AuthError> {
        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<TokenReview> = Api::all(self.client.clone());
        let result = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|source| k8s_client::OrchestratorError::from_kube("*", "tokenreview", source))
            .context(ReviewFailed)?;
        let status = result.status.unwrap_or_default();
        Ok(ReviewOutcome {
            authenticated: status.authenticated.unwrap_or(false),
            principal: status.user.and_then(|user| user.username),
        })
    }
}
