//! The HTTP surface (spec §6): `GET /health`, the two create routes, the two
//! delete routes. Everything except `/health` runs through `AuthGate` first;
//! every error, regardless of origin, is rendered through `HttpError`'s
//! single `{error, message, timestamp, requestId}` body shape.

mod create;
mod delete;
mod health;

pub use create::{create_agent_runtime, create_code_interpreter};
pub use delete::{delete_agent_runtime_session, delete_code_interpreter_session};
pub use health::health;

use crate::error::HttpError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: common_lib::ErrorCode,
    message: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl ResponseError for HttpError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code().status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.code(),
            message: self.message(),
            timestamp: chrono::Utc::now(),
            request_id: None,
        })
    }
}

pub fn extract_bearer(req: &actix_web::HttpRequest) -> Option<&str> {
    req.headers().get("Authorization").and_then(|value| value.to_str().ok())
}
