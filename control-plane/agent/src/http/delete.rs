//! `DELETE /v1/agent-runtime/sessions/{sessionId}` and the code-interpreter
//! equivalent (spec §6). Both routes share one delete flow: the session
//! record names its own namespace, so nothing about the route path
//! distinguishes the two beyond which URL the caller used.

use crate::{auth::AuthGate, error::HttpError, http::extract_bearer, pipeline::CreationPipeline};
use actix_web::{delete, web, HttpRequest, HttpResponse};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct MessageBody {
    message: String,
}

async fn delete_session(
    req: HttpRequest,
    session_id: web::Path<String>,
    auth: &AuthGate,
    pipeline: &CreationPipeline,
) -> Result<HttpResponse, HttpError> {
    let ctx = auth.authenticate(extract_bearer(&req)).await?;
    let session_id = session_id.into_inner();
    pipeline.delete_session(&session_id, &ctx.token, &ctx.principal).await?;
    Ok(HttpResponse::Ok().json(MessageBody {
        message: format!("session '{}' deleted", session_id),
    }))
}

#[delete("/v1/agent-runtime/sessions/{session_id}")]
pub async fn delete_agent_runtime_session(
    req: HttpRequest,
    session_id: web::Path<String>,
    auth: web::Data<Arc<AuthGate>>,
    pipeline: web::Data<Arc<CreationPipeline>>,
) -> Result<HttpResponse, HttpError> {
    delete_session(req, session_id, &**auth, &**pipeline).await
}

#[delete("/v1/code-interpreter/sessions/{session_id}")]
pub async fn delete_code_interpreter_session(
    req: HttpRequest,
    session_id: web::Path<String>,
    auth: web::Data<Arc<AuthGate>>,
    pipeline: web::Data<Arc<CreationPipeline>>,
) -> Result<HttpResponse, HttpError> {
    delete_session(req, session_id, &**auth, &**pipeline).await
}
