//! `POST /v1/agent-runtime` and `POST /v1/code-interpreter` (spec §6): the
//! two routes differ only in which `WorkloadKind` they're expected to
//! resolve to -- the pipeline itself decides whether to POST `/init` off the
//! template, not off which route was hit.

use crate::{
    auth::AuthGate,
    error::HttpError,
    http::extract_bearer,
    pipeline::{CreateRequest, CreationPipeline},
};
use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct CreateBody {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, rename = "publicKey")]
    pub public_key: Option<String>,
}

#[derive(Serialize)]
struct CreateResponseBody {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "sandboxId")]
    sandbox_id: String,
    #[serde(rename = "sandboxName")]
    sandbox_name: String,
    #[serde(rename = "entryPoints")]
    entry_points: Vec<EntryPointBody>,
}

#[derive(Serialize)]
struct EntryPointBody {
    path: String,
    protocol: String,
    endpoint: String,
}

async fn create(
    req: HttpRequest,
    body: web::Json<CreateBody>,
    auth: &AuthGate,
    pipeline: &CreationPipeline,
) -> Result<HttpResponse, HttpError> {
    let ctx = auth.authenticate(extract_bearer(&req)).await?;
    let body = body.into_inner();
    let response = pipeline
        .create(CreateRequest {
            namespace: body.namespace,
            name: body.name,
            public_key: body.public_key,
            token: ctx.token,
            principal: ctx.principal,
        })
        .await?;
    Ok(HttpResponse::Ok().json(CreateResponseBody {
        session_id: response.session_id,
        sandbox_id: response.sandbox_id,
        sandbox_name: response.sandbox_name,
        entry_points: response
            .entry_points
            .into_iter()
            .map(|e| EntryPointBody { path: e.path, protocol: e.protocol, endpoint: e.endpoint })
            .collect(),
    }))
}

#[post("/v1/agent-runtime")]
pub async fn create_agent_runtime(
    req: HttpRequest,
    body: web::Json<CreateBody>,
    auth: web::Data<Arc<AuthGate>>,
    pipeline: web::Data<Arc<CreationPipeline>>,
) -> Result<HttpResponse, HttpError> {
    create(req, body, &**auth, &**pipeline).await
}

#[post("/v1/code-interpreter")]
pub async fn create_code_interpreter(
    req: HttpRequest,
    body: web::Json<CreateBody>,
    auth: web::Data<Arc<AuthGate>>,
    pipeline: web::Data<Arc<CreationPipeline>>,
) -> Result<HttpResponse, HttpError> {
    create(req, body, &**auth, &**pipeline).await
}
