use actix_web::{get, HttpResponse, Responder};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

/// Liveness/readiness probe target (spec §6: `200 {"status":"healthy"}`).
/// Intentionally does not go through `AuthGate` -- a kubelet probe carries
/// no bearer token.
#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthBody { status: "healthy" })
}
